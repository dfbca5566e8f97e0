use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use netpol_core::Dialect;
use tracing::debug;

/// A policy file found under the input path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    /// Dialect implied by the directory the file sits in; `None` means the
    /// dialect is detected per document.
    pub dialect: Option<Dialect>,
}

impl InputFile {
    /// File name without its extension, used to name the converted output.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "policies".to_string())
    }
}

/// Dialect a directory name stands for.
pub fn dialect_for_dir(name: &str) -> Option<Dialect> {
    match name {
        "k8s" | "kubernetes" => Some(Dialect::Kubernetes),
        "calico" => Some(Dialect::Calico),
        "cilium" => Some(Dialect::Cilium),
        _ => None,
    }
}

/// Find policy files under `input`.
///
/// A file is returned as is. A directory yields its top-level YAML files
/// (dialect detected) followed by the YAML files of its `k8s`/`kubernetes`,
/// `calico` and `cilium` subdirectories. Other subdirectories are skipped.
pub fn discover(input: &Path) -> io::Result<Vec<InputFile>> {
    if input.is_file() {
        return Ok(vec![InputFile {
            path: input.to_path_buf(),
            dialect: None,
        }]);
    }

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for path in sorted_entries(input)? {
        if path.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match dialect_for_dir(&name) {
                Some(dialect) => subdirs.push((path, dialect)),
                None => debug!(path = %path.display(), "skipping unrelated directory"),
            }
        } else if is_yaml(&path) {
            files.push(InputFile {
                path,
                dialect: None,
            });
        }
    }

    for (dir, dialect) in subdirs {
        for path in sorted_entries(&dir)? {
            if path.is_file() && is_yaml(&path) {
                files.push(InputFile {
                    path,
                    dialect: Some(dialect),
                });
            }
        }
    }
    Ok(files)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}
