// src/core/paths.rs

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};

/// Expands a path template string, resolving the home directory (`~`) and
/// environment variables (`$VAR`, `${VAR}`).
///
/// # Arguments
/// * `template` - The template string (e.g., "~/.cache/scriptree").
///
/// # Errors
/// Returns an error if a referenced environment variable is not set.
pub fn expand_path_template(template: &str) -> Result<PathBuf> {
    let expanded_path_str = shellexpand::full(template)
        .map_err(|e| anyhow!("Failed to expand path template '{}': {}", template, e))?;
    Ok(PathBuf::from(expanded_path_str.into_owned()))
}

/// Joins `path` onto `base` unless it is already absolute, then removes `.` and `..`
/// components lexically.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

/// Removes `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A stable identity for cycle detection: the canonical path when it exists.
pub fn identity(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_resolve_against_normalizes() {
        let base = Path::new("/work/project");
        assert_eq!(
            resolve_against(base, Path::new("./configs/../base.toml")),
            PathBuf::from("/work/project/base.toml")
        );
        assert_eq!(
            resolve_against(base, Path::new("/etc/shared.toml")),
            PathBuf::from("/etc/shared.toml")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_expand_path_template_env() {
        let home = std::env::var("HOME").unwrap_or_default();
        if home.is_empty() {
            return;
        }
        let expanded = expand_path_template("$HOME/.cache/scriptree").unwrap();
        assert_eq!(expanded, PathBuf::from(format!("{home}/.cache/scriptree")));
        assert!(expand_path_template("$SCRIPTREE_SURELY_UNSET_VARIABLE/x").is_err());
    }
}
