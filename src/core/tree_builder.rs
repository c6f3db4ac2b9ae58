// src/core/tree_builder.rs

//! Turns the `scripts` section of a configuration document into a [`ScriptNode`] tree.

use serde_json::Value;

use super::config_loader::ConfigError;
use crate::models::{
    EnvDeclaration, IdempotencyDeclaration, IdempotencyKey, Namespace, ScriptNode,
};

const ENV_KEY: &str = "$env";
const ALIAS_KEY: &str = "$alias";
const IDEMPOTENCY_KEY: &str = "$idempotency";
const IDEMPOTENCY_ENABLED_KEY: &str = "$idempotencyEnabled";
const DESCRIPTION_KEY: &str = "$description";

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a table",
    }
}

fn child_location(location: &str, key: &str) -> String {
    if location.is_empty() {
        key.to_string()
    } else {
        format!("{location}.{key}")
    }
}

/// Builds the node for `value`, found at the dotted `location`.
pub fn build_node(value: &Value, location: &str) -> Result<ScriptNode, ConfigError> {
    match value {
        Value::String(text) => Ok(ScriptNode::Command(text.clone())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| build_node(item, &child_location(location, &i.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(ScriptNode::Sequence),
        Value::Object(map) => {
            let mut namespace = Namespace::new();
            for (key, child) in map {
                let here = child_location(location, key);
                match key.as_str() {
                    ENV_KEY => namespace.env = Some(parse_env(child, &here)?),
                    ALIAS_KEY => namespace.aliases = parse_strings(child, &here, key)?,
                    IDEMPOTENCY_KEY => {
                        namespace.idempotency = Some(parse_idempotency(child, &here)?);
                    }
                    IDEMPOTENCY_ENABLED_KEY => {
                        namespace.idempotency_enabled = Some(child.as_bool().ok_or_else(|| {
                            invalid_metadata(&here, key, "expected a boolean")
                        })?);
                    }
                    DESCRIPTION_KEY => {
                        namespace.description = Some(
                            child
                                .as_str()
                                .ok_or_else(|| invalid_metadata(&here, key, "expected a string"))?
                                .to_string(),
                        );
                    }
                    meta if meta.starts_with('$') => {
                        log::debug!("Ignoring unknown metadata key '{}'", here);
                    }
                    _ => namespace.insert(key, build_node(child, &here)?),
                }
            }
            Ok(namespace.into())
        }
        other => Err(ConfigError::InvalidScript {
            location: location.to_string(),
            found: type_name(other),
        }),
    }
}

fn invalid_metadata(location: &str, key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidMetadata {
        location: location.to_string(),
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_strings(value: &Value, location: &str, key: &str) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid_metadata(location, key, "expected a list of strings"))
            })
            .collect(),
        _ => Err(invalid_metadata(location, key, "expected a string or a list of strings")),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_env(value: &Value, location: &str) -> Result<EnvDeclaration, ConfigError> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(name, v)| {
                scalar_to_string(v).map(|v| (name.clone(), v)).ok_or_else(|| {
                    invalid_metadata(location, ENV_KEY, "values must be strings, numbers or booleans")
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(EnvDeclaration::Inline),
        Value::String(s) => s
            .strip_prefix("file:")
            .map(|file| EnvDeclaration::File(file.to_string()))
            .ok_or_else(|| invalid_metadata(location, ENV_KEY, "only 'file:<path>' strings are supported")),
        Value::Array(items) => items
            .iter()
            .map(|item| parse_env(item, location))
            .collect::<Result<Vec<_>, _>>()
            .map(EnvDeclaration::Many),
        _ => Err(invalid_metadata(location, ENV_KEY, "expected a table, a 'file:' string or a list")),
    }
}

fn parse_idempotency(value: &Value, location: &str) -> Result<IdempotencyDeclaration, ConfigError> {
    let keys = |value: &Value| -> Result<Vec<IdempotencyKey>, ConfigError> {
        parse_strings(value, location, IDEMPOTENCY_KEY)
            .map(|raw| raw.iter().map(|k| IdempotencyKey::parse(k)).collect())
    };
    match value {
        Value::String(raw) => Ok(IdempotencyDeclaration::Single(IdempotencyKey::parse(raw))),
        Value::Array(_) => keys(value).map(IdempotencyDeclaration::List),
        Value::Object(map) => map
            .iter()
            .map(|(label, v)| keys(v).map(|k| (label.clone(), k)))
            .collect::<Result<Vec<_>, _>>()
            .map(IdempotencyDeclaration::Labeled),
        _ => Err(invalid_metadata(location, IDEMPOTENCY_KEY, "expected a key, a list or a table")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HookKind;
    use serde_json::json;

    #[test]
    fn test_builds_structured_namespace() {
        let value = json!({
            "$description": "Build things",
            "$alias": ["b", "bld"],
            "$env": [{ "MODE": "release", "JOBS": 4 }, "file:.env"],
            "$idempotency": { "inputs": ["dir:src", "file:Cargo.lock"], "mode": "env:MODE" },
            "$idempotencyEnabled": true,
            "$unknown": 1,
            "_pre": "echo pre",
            "_pre_docs": "echo docs",
            "_default": "cargo build",
            "docs": ["cargo doc", { "_default": "open docs" }]
        });
        let node = build_node(&value, "build").unwrap();
        let ns = node.as_namespace().unwrap();

        assert_eq!(ns.description.as_deref(), Some("Build things"));
        assert_eq!(ns.aliases, vec!["b", "bld"]);
        assert_eq!(
            ns.env,
            Some(EnvDeclaration::Many(vec![
                EnvDeclaration::Inline(vec![
                    ("MODE".to_string(), "release".to_string()),
                    ("JOBS".to_string(), "4".to_string()),
                ]),
                EnvDeclaration::File(".env".to_string()),
            ]))
        );
        let keys: Vec<String> = ns.idempotency.as_ref().unwrap().keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["dir:src", "file:Cargo.lock", "env:MODE"]);
        assert_eq!(ns.idempotency_enabled, Some(true));

        assert_eq!(ns.entries.len(), 1);
        assert!(ns.variant("_default").is_some());
        assert!(ns.hooks.lookup(HookKind::Pre, Some("docs")).is_some());
        assert!(matches!(ns.entry("docs"), Some(ScriptNode::Sequence(items)) if items.len() == 2));
    }

    #[test]
    fn test_rejects_non_script_values() {
        let err = build_node(&json!({ "a": { "b": 42 } }), "").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid script at 'a.b': expected a string, list or table, found a number"
        );

        let err = build_node(&json!({ "$alias": 3 }), "x").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMetadata { key, .. } if key == "$alias"));
    }
}
