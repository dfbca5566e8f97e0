use std::fs;
use std::path::Path;

use netpol_core::TranslateOptions;
use serde::Deserialize;
use thiserror::Error;

/// Everything a conversion run can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub translate: TranslateOptions,
}

/// Errors returned when loading a settings file.
#[derive(Debug, Error)]
pub enum SettingsLoadError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Load settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| SettingsLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_settings(&raw, path.display().to_string())
}

/// Settings compiled into the binary.
pub fn default_settings() -> Settings {
    let embedded = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config/defaults.toml"));
    parse_settings(embedded, "embedded settings".to_string()).unwrap_or_default()
}

/// Settings from `path` when given, else the embedded defaults, with a label
/// naming where they came from.
pub fn resolve_settings(path: Option<&Path>) -> Result<(Settings, String), SettingsLoadError> {
    match path {
        Some(path) => Ok((load_settings(path)?, format!("file:{}", path.display()))),
        None => Ok((default_settings(), "embedded".to_string())),
    }
}

fn parse_settings(raw: &str, path: String) -> Result<Settings, SettingsLoadError> {
    toml::from_str(raw).map_err(|source| SettingsLoadError::Parse { path, source })
}
