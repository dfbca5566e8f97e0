use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use netpol_core::Dialect;

/// Output directory for files whose dialect could not be told.
pub const UNKNOWN_GROUP: &str = "unknown";

/// Directories `convert` may create under the output root.
fn output_groups() -> [&'static str; 4] {
    [
        Dialect::Kubernetes.as_str(),
        Dialect::Calico.as_str(),
        Dialect::Cilium.as_str(),
        UNKNOWN_GROUP,
    ]
}

/// Refuse an output directory whose group directories would land on or
/// inside the input, where converted files could replace source policies.
///
/// For a single input file the check is against the directory holding it.
pub fn ensure_output_separate(output: &Path, input: &Path) -> Result<()> {
    let out_norm = normalize_for_compare(output)
        .with_context(|| format!("failed to normalize output path {}", output.display()))?;
    let in_norm = normalize_for_compare(input)
        .with_context(|| format!("failed to normalize input path {}", input.display()))?;

    if out_norm == in_norm {
        bail!(
            "refusing to write into the input: output {} matches input {}",
            output.display(),
            input.display()
        );
    }

    let input_is_file = input.is_file();
    let input_dir = if input_is_file {
        in_norm.parent().map(Path::to_path_buf).unwrap_or(in_norm)
    } else {
        in_norm
    };
    for group in output_groups() {
        let dir = out_norm.join(group);
        let clash = if input_is_file {
            dir == input_dir
        } else {
            dir.starts_with(&input_dir)
        };
        if clash {
            bail!(
                "refusing to write into the input: output {} puts {} inside input {}",
                output.display(),
                dir.display(),
                input.display()
            );
        }
    }
    Ok(())
}

fn normalize_for_compare(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().context("current_dir")?.join(path)
    };

    // Canonicalize the longest existing prefix; `..` below it is not resolved.
    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute.clone()),
        }
    }
    let mut normalized = existing
        .canonicalize()
        .with_context(|| format!("canonicalize {}", existing.display()))?;
    normalized.extend(rest.iter().rev());
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::ensure_output_separate;
    use tempfile::tempdir;

    #[test]
    fn same_directory_is_refused() {
        let dir = tempdir().expect("tempdir");
        let alias = dir.path().join(".");
        let err = ensure_output_separate(&alias, dir.path()).expect_err("should refuse");
        assert!(err.to_string().contains("refusing to write into the input"));
    }

    #[test]
    fn sibling_directory_is_allowed() {
        let dir = tempdir().expect("tempdir");
        let out = dir.path().join("out");
        assert!(ensure_output_separate(&out, &dir.path().join("in")).is_ok());
    }

    #[test]
    fn parent_of_a_dialect_named_input_is_refused() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("kubernetes");
        fs::create_dir(&input).expect("mkdir");
        let err = ensure_output_separate(dir.path(), &input).expect_err("should refuse");
        assert!(err.to_string().contains("inside input"), "{err}");
    }

    #[test]
    fn output_nested_in_input_is_refused() {
        let dir = tempdir().expect("tempdir");
        let out = dir.path().join("converted");
        assert!(ensure_output_separate(&out, dir.path()).is_err());
    }

    #[test]
    fn single_file_is_guarded_by_its_directory() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("calico")).expect("mkdir");
        let input = dir.path().join("calico/a.yaml");
        fs::write(&input, "kind: NetworkPolicy\n").expect("write");

        assert!(ensure_output_separate(dir.path(), &input).is_err());
        assert!(ensure_output_separate(&dir.path().join("out"), &input).is_ok());
    }
}
