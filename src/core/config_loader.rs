//! # Config Loader
//!
//! Locates the configuration file, resolves its `extends` chain and turns the merged
//! document into the script tree plus the global [`Settings`] the engine runs with.
//!
//! Documents are TOML or JSON. Both are read into an order-preserving
//! `serde_json::Value` so the declaration order of scripts survives the merge.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{paths, tree_builder};
use crate::constants::{
    CONFIG_FILENAMES, DEFAULT_IDEMPOTENCY_LOCATION, DEFAULT_RUNTIME, ENV_CONFIG,
    ENV_DISABLE_IDEMPOTENCY,
};
use crate::models::{IdempotencySettings, Namespace, ScriptNode, Settings};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot find config {0}")]
    NotFound(String),
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Config '{path}' extends itself")]
    ExtendsCycle { path: PathBuf },
    #[error("Invalid 'extends' entry in '{path}': expected a path or a list starting with a path")]
    InvalidExtends { path: PathBuf },
    #[error("Invalid [config] section in '{path}': {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid idempotency location '{location}': {message}")]
    Location { location: String, message: String },
    #[error("Invalid script at '{location}': expected a string, list or table, found {found}")]
    InvalidScript {
        location: String,
        found: &'static str,
    },
    #[error("Invalid '{key}' at '{location}': {message}")]
    InvalidMetadata {
        location: String,
        key: String,
        message: String,
    },
}

/// The `[config]` section as written by users.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigSection {
    case_insensitive: bool,
    runtime: Option<String>,
    idempotency: IdempotencySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdempotencySection {
    location: Option<String>,
    use_file_content: bool,
}

/// A fully loaded configuration.
#[derive(Debug)]
pub struct LoadedConfig {
    /// The file the configuration was loaded from.
    pub path: PathBuf,
    /// The root namespace of the script tree.
    pub root: ScriptNode,
    /// Settings derived from the `[config]` section and the environment.
    pub settings: Settings,
}

/// Finds the configuration file: `explicit`, then `SCRIPTREE_CONFIG`, then the default
/// file names in `working_dir`. The first existing candidate wins.
pub fn discover(explicit: Option<&Path>, working_dir: &Path) -> Result<PathBuf, ConfigError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    candidates.extend(explicit.map(Path::to_path_buf));
    candidates.extend(std::env::var_os(ENV_CONFIG).map(PathBuf::from));
    candidates.extend(CONFIG_FILENAMES.iter().map(PathBuf::from));

    candidates
        .iter()
        .map(|candidate| paths::resolve_against(working_dir, candidate))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            let listed: Vec<String> = candidates
                .iter()
                .map(|c| format!("'{}'", c.display()))
                .collect();
            ConfigError::NotFound(listed.join(" or "))
        })
}

/// Discovers and loads the configuration for `working_dir`.
pub fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<LoadedConfig, ConfigError> {
    let path = discover(explicit, working_dir)?;
    load_file(&path, working_dir)
}

/// Loads a specific configuration file, including everything it extends.
pub fn load_file(path: &Path, working_dir: &Path) -> Result<LoadedConfig, ConfigError> {
    log::debug!("Loading config from '{}'", path.display());
    let mut chain = Vec::new();
    let document = load_document(path, &mut chain)?;

    let section = match document.get("config") {
        Some(value) => ConfigSection::deserialize(value).map_err(|source| ConfigError::Settings {
            path: path.to_path_buf(),
            source,
        })?,
        None => ConfigSection::default(),
    };
    let settings = build_settings(section, working_dir)?;

    let root = match document.get("scripts") {
        Some(scripts) => tree_builder::build_node(scripts, "")?,
        None => Namespace::new().into(),
    };

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        root,
        settings,
    })
}

fn build_settings(section: ConfigSection, working_dir: &Path) -> Result<Settings, ConfigError> {
    let template = section
        .idempotency
        .location
        .unwrap_or_else(|| DEFAULT_IDEMPOTENCY_LOCATION.to_string());
    let location = paths::expand_path_template(&template).map_err(|e| ConfigError::Location {
        location: template.clone(),
        message: e.to_string(),
    })?;

    let runtime = match section.runtime {
        Some(runtime) if runtime.is_empty() => None,
        Some(runtime) => Some(runtime),
        None => Some(DEFAULT_RUNTIME.to_string()),
    };
    let disabled = std::env::var(ENV_DISABLE_IDEMPOTENCY).is_ok_and(|v| v == "true");

    Ok(Settings {
        working_dir: working_dir.to_path_buf(),
        case_insensitive: section.case_insensitive,
        runtime,
        quiet: false,
        idempotency: IdempotencySettings {
            location: paths::resolve_against(working_dir, &location),
            use_file_content: section.idempotency.use_file_content,
            disabled,
        },
    })
}

fn parse_document(path: &Path, content: &str) -> Result<Value, ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str::<Value>(content).map_err(|e| e.to_string())
    } else {
        toml::from_str::<Value>(content).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Reads `path` and folds in the documents it extends. Earlier `extends` entries take
/// precedence over later ones and the extending document wins over all of them.
fn load_document(path: &Path, chain: &mut Vec<PathBuf>) -> Result<Value, ConfigError> {
    let identity = paths::identity(path);
    if chain.contains(&identity) {
        return Err(ConfigError::ExtendsCycle {
            path: path.to_path_buf(),
        });
    }
    chain.push(identity);

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut document = parse_document(path, &content)?;

    let extends = match &mut document {
        Value::Object(map) => map.shift_remove("extends"),
        _ => None,
    };
    let base_dir = path.parent().unwrap_or(Path::new("."));
    for entry in extends_entries(extends, path)? {
        let target = paths::resolve_against(base_dir, Path::new(&entry));
        let extension = load_document(&target, chain)?;
        merge_defaults(&mut document, extension);
    }

    chain.pop();
    Ok(document)
}

fn extends_entries(extends: Option<Value>, path: &Path) -> Result<Vec<String>, ConfigError> {
    let invalid = || ConfigError::InvalidExtends {
        path: path.to_path_buf(),
    };
    let items = match extends {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(single @ Value::String(_)) => vec![single],
        Some(_) => return Err(invalid()),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            // `[path, ...arguments]`; arguments only mattered for executable configs.
            Value::Array(parts) => parts
                .into_iter()
                .next()
                .and_then(|first| first.as_str().map(str::to_string))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        })
        .collect()
}

/// Fills keys missing from `target` with the ones from `defaults`, recursing into tables.
pub fn merge_defaults(target: &mut Value, defaults: Value) {
    if target.is_null() {
        *target = defaults;
        return;
    }
    if let (Value::Object(target), Value::Object(defaults)) = (target, defaults) {
        merge_maps(target, defaults);
    }
}

fn merge_maps(target: &mut Map<String, Value>, defaults: Map<String, Value>) {
    for (key, value) in defaults {
        match target.get_mut(&key) {
            Some(existing) => merge_defaults(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_defaults_prefers_target() {
        let mut target = json!({ "scripts": { "build": "cargo build", "nested": { "a": "1" } } });
        merge_defaults(
            &mut target,
            json!({ "scripts": { "build": "make", "test": "cargo test", "nested": { "b": "2" } }, "config": { "runtime": "" } }),
        );
        assert_eq!(
            target,
            json!({
                "scripts": { "build": "cargo build", "nested": { "a": "1", "b": "2" }, "test": "cargo test" },
                "config": { "runtime": "" }
            })
        );
    }

    #[test]
    fn test_load_toml_with_extends_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shared")).unwrap();
        fs::write(
            dir.path().join("shared/base.json"),
            r#"{ "scripts": { "lint": "cargo clippy", "build": "make" }, "config": { "case_insensitive": true } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("scriptree.toml"),
            r#"
extends = ["shared/base.json"]

[config]
runtime = ""

[config.idempotency]
location = "cache/idem"
use_file_content = true

[scripts]
build = "cargo build"

[scripts.test]
"$description" = "Run tests"
_default = "cargo test"
"#,
        )
        .unwrap();

        let loaded = load(None, dir.path()).unwrap();
        assert_eq!(loaded.path, dir.path().join("scriptree.toml"));
        assert!(loaded.settings.case_insensitive);
        assert_eq!(loaded.settings.runtime, None);
        assert!(loaded.settings.idempotency.use_file_content);
        assert_eq!(loaded.settings.idempotency.location, dir.path().join("cache/idem"));

        let root = loaded.root.as_namespace().unwrap();
        let keys: Vec<&str> = root.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["build", "test", "lint"]);
        assert!(matches!(root.entry("build"), Some(ScriptNode::Command(c)) if c == "cargo build"));
    }

    #[test]
    fn test_missing_config_and_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(Some(Path::new("custom.toml")), dir.path()).unwrap_err();
        assert!(err.to_string().contains("'custom.toml'"));
        assert!(err.to_string().contains("'scriptree.json'"));

        fs::write(dir.path().join("a.toml"), "extends = [\"b.toml\"]\n").unwrap();
        fs::write(dir.path().join("b.toml"), "extends = [\"a.toml\"]\n").unwrap();
        let err = load_file(&dir.path().join("a.toml"), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ExtendsCycle { .. }));
    }

    #[test]
    fn test_defaults_without_config_section() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("scriptree.json"), r#"{ "scripts": { "a": "echo a" } }"#).unwrap();
        let loaded = load(None, dir.path()).unwrap();
        assert_eq!(loaded.settings.runtime.as_deref(), Some(DEFAULT_RUNTIME));
        assert_eq!(
            loaded.settings.idempotency.location,
            dir.path().join(DEFAULT_IDEMPOTENCY_LOCATION)
        );
        assert!(!loaded.settings.case_insensitive);
    }
}
