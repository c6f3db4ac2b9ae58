// src/core/help.rs

use colored::Colorize;

use super::engine::EngineError;
use super::resolver::{ResolveError, Resolver};
use crate::models::{ExecutionPath, ScriptNode};

/// A one-line summary of a node, as shown next to its path.
pub fn describe(node: &ScriptNode) -> String {
    match node {
        ScriptNode::Command(text) => text.clone(),
        ScriptNode::Sequence(items) => format!("[{}]", items.len()),
        ScriptNode::Namespace(ns) => match &ns.description {
            Some(description) => description.clone(),
            None => {
                let keys: Vec<&str> = ns
                    .entries
                    .iter()
                    .chain(ns.variants.iter())
                    .map(|(key, _)| key.as_str())
                    .collect();
                format!("{{{}}}", keys.join(", "))
            }
        },
        ScriptNode::Computed(_) => "<function>".to_string(),
    }
}

/// The runnable children of a node with their one-line descriptions.
/// Hooks and metadata are left out.
pub fn children(node: &ScriptNode) -> Vec<(String, String)> {
    match node {
        ScriptNode::Namespace(ns) => ns
            .entries
            .iter()
            .chain(ns.variants.iter())
            .map(|(key, child)| (key.clone(), describe(child)))
            .collect(),
        ScriptNode::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, child)| (i.to_string(), describe(child)))
            .collect(),
        ScriptNode::Command(_) | ScriptNode::Computed(_) => Vec::new(),
    }
}

fn line(path: &str, description: &str, node: &ScriptNode) -> String {
    let description = match node {
        ScriptNode::Command(_) => description.normal(),
        _ => description.dimmed(),
    };
    format!("{}{}{}", path.green(), " - ".dimmed(), description)
}

fn child_lines(node: &ScriptNode, path: &ExecutionPath) -> Vec<String> {
    children(node)
        .into_iter()
        .filter_map(|(key, description)| {
            let child = Resolver::default().resolve(node, &key)?;
            Some(line(&path.child(key).dotted(), &description, child.1))
        })
        .collect()
}

/// Renders a failure for the terminal. For `NotFound` the alternatives available in the
/// last matched container are listed.
pub fn render_error(root: &ScriptNode, resolver: &Resolver, error: &EngineError) -> String {
    let EngineError::NotFound { container, .. } = error else {
        return error.to_string().red().to_string();
    };

    let mut out = vec![error.to_string().red().to_string()];
    let Ok((node, path)) = resolver.resolve_path(root, container.segments()) else {
        return out.join("\n");
    };
    let alternatives = child_lines(node, &path);
    if alternatives.is_empty() {
        return out.join("\n");
    }

    out.push(String::new());
    let description = node
        .as_namespace()
        .and_then(|ns| ns.description.as_deref())
        .filter(|_| !path.is_root());
    if let Some(description) = description {
        out.push(line(&path.dotted(), description, node));
        out.push(String::new());
    }
    out.push("Try one of the following:".bold().to_string());
    out.extend(alternatives);
    out.join("\n")
}

/// Lists the tree, or the subtrees addressed by `paths`.
pub fn render_listing(
    root: &ScriptNode,
    resolver: &Resolver,
    paths: &[String],
) -> Result<String, ResolveError> {
    if paths.is_empty() {
        let mut out = vec!["Available commands:".bold().to_string()];
        out.extend(child_lines(root, &ExecutionPath::root()));
        return Ok(out.join("\n"));
    }

    let mut out = Vec::new();
    for dotted in paths {
        let segments = ExecutionPath::parse(dotted);
        let (node, path) = resolver.resolve_path(root, segments.segments())?;
        out.push(format!("{} {}", "Available commands:".bold(), dotted.dimmed()));
        if !path.is_root() {
            out.push(line(&path.dotted(), &describe(node), node));
        }
        out.extend(child_lines(node, &path));
        out.push(String::new());
    }
    Ok(out.join("\n").trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Namespace;

    fn tree() -> ScriptNode {
        Namespace::new()
            .with(
                "test",
                Namespace::new()
                    .with_description("Runs the test suites")
                    .with("unit", ScriptNode::command("cargo test --lib"))
                    .with("_pre", ScriptNode::command("setup")),
            )
            .with("lint", ScriptNode::sequence([ScriptNode::command("a"), ScriptNode::command("b")]))
            .with("gen", ScriptNode::computed(|_| Ok(None)))
            .with("raw", Namespace::new().with("_default", ScriptNode::command("x")).with("_pre", ScriptNode::command("y")))
            .into()
    }

    #[test]
    fn test_children_and_descriptions() {
        let root = tree();
        assert_eq!(
            children(&root),
            vec![
                ("test".to_string(), "Runs the test suites".to_string()),
                ("lint".to_string(), "[2]".to_string()),
                ("gen".to_string(), "<function>".to_string()),
                ("raw".to_string(), "{_default}".to_string()),
            ]
        );
        let test = Resolver::default().resolve(&root, "test").unwrap().1;
        assert_eq!(children(test), vec![("unit".to_string(), "cargo test --lib".to_string())]);
    }

    #[test]
    fn test_not_found_lists_alternatives() {
        colored::control::set_override(false);
        let root = tree();
        let error = EngineError::NotFound {
            container: ExecutionPath::parse("test"),
            segment: Some("e2e".to_string()),
        };
        let rendered = render_error(&root, &Resolver::default(), &error);
        assert_eq!(
            rendered,
            "Script 'test' does not have a 'e2e' script\n\
             \n\
             test - Runs the test suites\n\
             \n\
             Try one of the following:\n\
             test.unit - cargo test --lib"
        );
    }

    #[test]
    fn test_listing_of_subtree() {
        colored::control::set_override(false);
        let root = tree();
        let listing = render_listing(&root, &Resolver::default(), &["lint".to_string()]).unwrap();
        assert_eq!(listing, "Available commands: lint\nlint - [2]\nlint.0 - a\nlint.1 - b");
        assert!(render_listing(&root, &Resolver::default(), &["nope".to_string()]).is_err());
    }
}
