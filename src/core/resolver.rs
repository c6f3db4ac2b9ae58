// src/core/resolver.rs

use thiserror::Error;

use crate::models::{ExecutionPath, Namespace, ScriptNode};

/// The segment that fans out over every eligible child.
pub const WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Segment '{segment}' does not exist under '{container}'")]
    NotFound {
        /// The segment that did not match.
        segment: String,
        /// The last container that did match.
        container: ExecutionPath,
    },
}

/// A child found by [`Resolver::resolve`]: the key it is stored under and the node.
pub type Resolved<'t> = (String, &'t ScriptNode);

/// Matches path segments against tree nodes: exact keys or indices first, then the
/// optional case-insensitive fallback, then `$alias` declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    case_insensitive: bool,
}

impl Resolver {
    pub fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    /// Resolves a single segment against `node`.
    pub fn resolve<'t>(&self, node: &'t ScriptNode, segment: &str) -> Option<Resolved<'t>> {
        match node {
            ScriptNode::Namespace(ns) => self.resolve_in_namespace(ns, segment),
            ScriptNode::Sequence(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index).map(|node| (index.to_string(), node)))
                .or_else(|| {
                    let indexed = items.iter().enumerate().map(|(i, n)| (i.to_string(), n));
                    self.resolve_alias(indexed, segment)
                }),
            ScriptNode::Command(_) | ScriptNode::Computed(_) => None,
        }
    }

    /// Resolves a single segment against the keys of a namespace.
    pub fn resolve_in_namespace<'t>(&self, ns: &'t Namespace, segment: &str) -> Option<Resolved<'t>> {
        self.resolve_key(ns, segment).or_else(|| {
            let entries = ns.entries.iter().map(|(k, n)| (k.clone(), n));
            self.resolve_alias(entries, segment)
        })
    }

    fn resolve_key<'t>(&self, ns: &'t Namespace, segment: &str) -> Option<Resolved<'t>> {
        if let Some(node) = ns.get(segment) {
            return Some((segment.to_string(), node));
        }
        if !self.case_insensitive {
            return None;
        }
        let wanted = segment.to_lowercase();
        let key = ns.keys().into_iter().find(|key| key.to_lowercase() == wanted)?;
        ns.get(&key).map(|node| (key, node))
    }

    /// Finds the first namespace child declaring `segment` as one of its aliases.
    fn resolve_alias<'t>(
        &self,
        mut candidates: impl Iterator<Item = (String, &'t ScriptNode)>,
        segment: &str,
    ) -> Option<Resolved<'t>> {
        candidates.find(|(_, node)| {
            node.as_namespace()
                .is_some_and(|ns| ns.aliases.iter().any(|alias| self.matches(alias, segment)))
        })
    }

    fn matches(&self, candidate: &str, segment: &str) -> bool {
        if self.case_insensitive {
            candidate.to_lowercase() == segment.to_lowercase()
        } else {
            candidate == segment
        }
    }

    /// Every child a `*` segment fans out to, in declaration order. Control and metadata
    /// keys never take part.
    pub fn fan_out<'t>(&self, node: &'t ScriptNode) -> Vec<Resolved<'t>> {
        match node {
            ScriptNode::Namespace(ns) => self.fan_out_in_namespace(ns),
            ScriptNode::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, n)| (i.to_string(), n))
                .collect(),
            ScriptNode::Command(_) | ScriptNode::Computed(_) => Vec::new(),
        }
    }

    /// The entries of a namespace a `*` segment fans out to.
    pub fn fan_out_in_namespace<'t>(&self, ns: &'t Namespace) -> Vec<Resolved<'t>> {
        ns.entries.iter().map(|(k, n)| (k.clone(), n)).collect()
    }

    /// Walks `segments` from `root` without executing anything. Wildcards and computed
    /// nodes cannot be walked statically and report `NotFound`.
    pub fn resolve_path<'t>(
        &self,
        root: &'t ScriptNode,
        segments: &[String],
    ) -> Result<(&'t ScriptNode, ExecutionPath), ResolveError> {
        let mut node = root;
        let mut path = ExecutionPath::root();
        for segment in segments {
            let (key, next) = (segment != WILDCARD)
                .then(|| self.resolve(node, segment))
                .flatten()
                .ok_or_else(|| ResolveError::NotFound {
                    segment: segment.clone(),
                    container: path.clone(),
                })?;
            node = next;
            path = path.child(key);
        }
        Ok((node, path))
    }
}
