// src/core/selectors.rs

//! Variant selectors decide what a bare namespace invocation runs.
//!
//! The engine asks each registered selector, in priority order, whether it claims a
//! namespace. The first claimant either hands back a node to run or drives the
//! execution itself and reports that nothing is left to do.

use std::fmt;
use std::path::Path;

use rayon::prelude::*;

use super::engine::EngineError;
use crate::models::{ExecutionOptions, ExecutionPath, Namespace, ScriptNode};
use crate::system::platform::{self, PlatformInfo};

/// Reserved variant key run by [`KeySelector::ci`].
pub const CI_KEY: &str = "_ci";
/// Reserved variant key run by [`KeySelector::fallback`].
pub const DEFAULT_KEY: &str = "_default";
/// Reserved variant key driven by [`ConcurrentSelector`].
pub const CONCURRENT_KEY: &str = "_concurrently";

/// The outcome of [`VariantSelector::select`].
#[derive(Debug)]
pub enum Selection<'t> {
    /// Run `node`; `label` is appended to the execution path.
    Run { node: &'t ScriptNode, label: String },
    /// The selector already did the work.
    Done,
}

/// Re-enters the engine for nodes a selector runs on its own.
pub trait Dispatcher: Sync {
    fn dispatch(
        &self,
        node: &ScriptNode,
        path: &ExecutionPath,
        options: &ExecutionOptions,
    ) -> Result<(), EngineError>;
}

/// What a selector gets to work with when it has claimed a namespace.
pub struct SelectionRequest<'a> {
    pub path: &'a ExecutionPath,
    pub options: &'a ExecutionOptions,
    pub dispatcher: &'a dyn Dispatcher,
}

impl fmt::Debug for SelectionRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionRequest")
            .field("path", self.path)
            .field("options", self.options)
            .finish_non_exhaustive()
    }
}

pub trait VariantSelector: Send + Sync + fmt::Debug {
    /// Short name used in debug logs.
    fn name(&self) -> &str;

    /// Whether this selector takes responsibility for `namespace`.
    fn claims(&self, namespace: &Namespace) -> bool;

    /// Picks the node to run. Only called after [`VariantSelector::claims`] returned `true`.
    fn select<'t>(
        &self,
        namespace: &'t Namespace,
        request: &SelectionRequest<'_>,
    ) -> Result<Selection<'t>, EngineError>;
}

/// Claims the first present key of an ordered candidate list.
#[derive(Debug, Clone)]
pub struct KeySelector {
    name: &'static str,
    keys: Vec<String>,
}

impl KeySelector {
    /// `_ci`, active only when running inside a CI service.
    pub fn ci(is_ci: bool) -> Self {
        let keys = if is_ci { vec![CI_KEY.to_string()] } else { Vec::new() };
        Self { name: "ci", keys }
    }

    /// OS, architecture and runtime-version keys, most specific first.
    pub fn platform(info: &PlatformInfo) -> Self {
        Self {
            name: "platform",
            keys: info.candidate_keys(),
        }
    }

    /// `_default`, unconditionally.
    pub fn fallback() -> Self {
        Self {
            name: "default",
            keys: vec![DEFAULT_KEY.to_string()],
        }
    }

    fn first_present<'t>(&self, namespace: &'t Namespace) -> Option<(&str, &'t ScriptNode)> {
        self.keys
            .iter()
            .find_map(|key| namespace.variant(key).map(|node| (key.as_str(), node)))
    }
}

impl VariantSelector for KeySelector {
    fn name(&self) -> &str {
        self.name
    }

    fn claims(&self, namespace: &Namespace) -> bool {
        self.first_present(namespace).is_some()
    }

    fn select<'t>(
        &self,
        namespace: &'t Namespace,
        _request: &SelectionRequest<'_>,
    ) -> Result<Selection<'t>, EngineError> {
        Ok(match self.first_present(namespace) {
            Some((key, node)) => Selection::Run {
                node,
                label: key.to_string(),
            },
            None => Selection::Done,
        })
    }
}

/// Runs the elements of a `_concurrently` sequence in parallel and waits for all of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentSelector;

impl VariantSelector for ConcurrentSelector {
    fn name(&self) -> &str {
        "concurrently"
    }

    fn claims(&self, namespace: &Namespace) -> bool {
        namespace.variant(CONCURRENT_KEY).is_some()
    }

    fn select<'t>(
        &self,
        namespace: &'t Namespace,
        request: &SelectionRequest<'_>,
    ) -> Result<Selection<'t>, EngineError> {
        let Some(node) = namespace.variant(CONCURRENT_KEY) else {
            return Ok(Selection::Done);
        };
        let ScriptNode::Sequence(items) = node else {
            return Ok(Selection::Run {
                node,
                label: CONCURRENT_KEY.to_string(),
            });
        };

        let base = request.path.child(CONCURRENT_KEY);
        let options = request.options.excluding_args();
        let results: Vec<Result<(), EngineError>> = items
            .par_iter()
            .enumerate()
            .map(|(i, item)| request.dispatcher.dispatch(item, &base.child(i.to_string()), &options))
            .collect();

        let mut first_failure = None;
        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                if first_failure.is_none() {
                    first_failure = Some(e);
                } else {
                    log::error!("Concurrent step '{}.{}' also failed: {}", base, i, e);
                }
            }
        }
        first_failure.map_or(Ok(Selection::Done), Err)
    }
}

/// The built-in selectors in priority order: CI, platform, default, concurrently.
/// Probes the host and the configured runtime once.
pub fn default_selectors(runtime: Option<&str>, working_dir: &Path) -> Vec<Box<dyn VariantSelector>> {
    let info = PlatformInfo::detect(runtime, working_dir);
    log::debug!("Platform variant keys: {:?}", info.candidate_keys());
    vec![
        Box::new(KeySelector::ci(platform::detect_ci())),
        Box::new(KeySelector::platform(&info)),
        Box::new(KeySelector::fallback()),
        Box::new(ConcurrentSelector),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::platform::RuntimeVersion;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl Dispatcher for Recorder {
        fn dispatch(
            &self,
            node: &ScriptNode,
            path: &ExecutionPath,
            _options: &ExecutionOptions,
        ) -> Result<(), EngineError> {
            if let ScriptNode::Command(text) = node {
                self.seen.lock().unwrap().push(format!("{text}@{path}"));
                if self.fail_on.as_deref() == Some(text.as_str()) {
                    return Err(EngineError::CommandFailed {
                        code: 3,
                        path: path.clone(),
                    });
                }
            }
            Ok(())
        }
    }

    fn request<'a>(path: &'a ExecutionPath, options: &'a ExecutionOptions, d: &'a Recorder) -> SelectionRequest<'a> {
        SelectionRequest {
            path,
            options,
            dispatcher: d,
        }
    }

    fn label_of(selection: Selection<'_>) -> String {
        match selection {
            Selection::Run { label, .. } => label,
            Selection::Done => "<done>".to_string(),
        }
    }

    #[test]
    fn test_ci_selector_only_claims_in_ci() {
        let ns = Namespace::new()
            .with("_ci", ScriptNode::command("ci"))
            .with("_default", ScriptNode::command("local"));
        assert!(KeySelector::ci(true).claims(&ns));
        assert!(!KeySelector::ci(false).claims(&ns));
        assert!(!KeySelector::ci(true).claims(&Namespace::new()));
    }

    #[test]
    fn test_platform_selector_prefers_specific_keys_in_order() {
        let info = PlatformInfo::for_host("linux", "x86_64")
            .with_runtime("node", RuntimeVersion { major: 20, minor: 1, patch: 0 });
        let selector = KeySelector::platform(&info);
        let path = ExecutionPath::parse("build");
        let options = ExecutionOptions::default();
        let recorder = Recorder::default();

        let ns = Namespace::new()
            .with("_node20", ScriptNode::command("node"))
            .with("_x64", ScriptNode::command("x64"));
        assert!(selector.claims(&ns));
        let picked = selector.select(&ns, &request(&path, &options, &recorder)).unwrap();
        assert_eq!(label_of(picked), "_x64");

        let ns = Namespace::new().with("_node20_1", ScriptNode::command("minor"));
        let picked = selector.select(&ns, &request(&path, &options, &recorder)).unwrap();
        assert_eq!(label_of(picked), "_node20_1");

        assert!(!selector.claims(&Namespace::new().with("_win32", ScriptNode::command("w"))));
    }

    #[test]
    fn test_concurrent_selector_runs_every_step() {
        let ns = Namespace::new().with(
            "_concurrently",
            ScriptNode::sequence([ScriptNode::command("a"), ScriptNode::command("b")]),
        );
        let path = ExecutionPath::parse("dev");
        let options = ExecutionOptions::default();
        let recorder = Recorder::default();

        let selection = ConcurrentSelector.select(&ns, &request(&path, &options, &recorder)).unwrap();
        assert!(matches!(selection, Selection::Done));
        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a@dev._concurrently.0", "b@dev._concurrently.1"]);
    }

    #[test]
    fn test_concurrent_selector_reports_failure_after_all_steps() {
        let ns = Namespace::new().with(
            "_concurrently",
            ScriptNode::sequence([ScriptNode::command("bad"), ScriptNode::command("good")]),
        );
        let path = ExecutionPath::parse("dev");
        let options = ExecutionOptions::default();
        let recorder = Recorder {
            fail_on: Some("bad".to_string()),
            ..Recorder::default()
        };

        let err = ConcurrentSelector
            .select(&ns, &request(&path, &options, &recorder))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_key_with_plain_value_runs_as_variant() {
        let ns = Namespace::new().with("_concurrently", ScriptNode::command("solo"));
        let path = ExecutionPath::parse("dev");
        let options = ExecutionOptions::default();
        let recorder = Recorder::default();
        let picked = ConcurrentSelector.select(&ns, &request(&path, &options, &recorder)).unwrap();
        assert_eq!(label_of(picked), "_concurrently");
    }
}
