// src/core/engine.rs

//! The recursive interpreter behind every `scriptree` invocation.
//!
//! A dotted path is consumed segment by segment while descending the script tree.
//! Namespaces wrap their selected child in the hook lifecycle
//! (`_pre`, body, `_post`, `_onError`/`_catch`, `_finally`), layer their `$env` on top
//! of the inherited overlay and consult the idempotency cache before doing any work.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use colored::Colorize;
use thiserror::Error;

use super::env_file;
use super::idempotency::IdempotencyCache;
use super::resolver::{Resolver, WILDCARD};
use super::selectors::{Dispatcher, Selection, SelectionRequest, VariantSelector};
use crate::constants::{
    ENV_LAST_ERROR, ENV_PARENT_PATH, ENV_SCRIPT_PATH, EXIT_FAILURE, EXIT_NOT_FOUND,
    MAX_DISPATCH_DEPTH,
};
use crate::models::{
    ComputeContext, ComputeFn, ExecutionOptions, ExecutionPath, HookKind, Namespace,
    ScriptNode, Settings,
};
use crate::system::executor::{
    self, CommandInvocation, CommandRunner, ExecutionError, ShellRunner,
};

/// First segment of a path resolved against the invoking script's namespace.
pub const RELATIVE_MARKER: &str = "~";

/// Failures surfaced by [`Engine::run`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{}", not_found_message(.container, .segment.as_deref()))]
    NotFound {
        /// The last container that did resolve.
        container: ExecutionPath,
        /// The segment that did not; `None` when the container has nothing to run.
        segment: Option<String>,
    },
    #[error("Script '{path}' failed with exit code {code}")]
    CommandFailed { code: i32, path: ExecutionPath },
    #[error("Function '{path}' failed: {source:#}")]
    FunctionFailed {
        path: ExecutionPath,
        #[source]
        source: anyhow::Error,
    },
    #[error("Script '{path}' could not be started: {source}")]
    Spawn {
        path: ExecutionPath,
        #[source]
        source: ExecutionError,
    },
    #[error("Script '{path}' exceeded the maximum nesting depth")]
    RecursionLimit { path: ExecutionPath },
}

fn not_found_message(container: &ExecutionPath, segment: Option<&str>) -> String {
    match segment {
        Some(segment) if container.is_root() => format!("Script '{segment}' does not exist"),
        Some(segment) => format!("Script '{container}' does not have a '{segment}' script"),
        None if container.is_root() => "No script to run".to_string(),
        None => format!("Script '{container}' has nothing to run on this platform"),
    }
}

impl EngineError {
    /// The process exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => EXIT_NOT_FOUND,
            Self::CommandFailed { code, .. } => *code,
            Self::FunctionFailed { .. } | Self::Spawn { .. } | Self::RecursionLimit { .. } => {
                EXIT_FAILURE
            }
        }
    }

    /// Whether `_onError` and `_catch` get a chance to handle this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::FunctionFailed { .. } | Self::Spawn { .. }
        )
    }
}

/// What a namespace invocation resolved to, decided before any hook runs.
enum Plan<'a> {
    Select(&'a dyn VariantSelector),
    FanOut(Vec<(String, &'a ScriptNode)>, &'a [String]),
    Child(String, &'a ScriptNode, &'a [String]),
}

/// Executes dotted paths against a script tree.
pub struct Engine<'t> {
    root: &'t ScriptNode,
    settings: Settings,
    resolver: Resolver,
    cache: IdempotencyCache,
    selectors: Vec<Box<dyn VariantSelector>>,
    runner: Arc<dyn CommandRunner>,
    forwarded_args: Vec<String>,
    origin: Option<ExecutionPath>,
    invoked_from: Option<String>,
    base_env: BTreeMap<String, String>,
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("selectors", &self.selectors)
            .field("forwarded_args", &self.forwarded_args)
            .field("origin", &self.origin)
            .field("invoked_from", &self.invoked_from)
            .finish_non_exhaustive()
    }
}

impl<'t> Engine<'t> {
    /// Creates an engine over `root`. Selectors are consulted in the given order.
    pub fn new(
        root: &'t ScriptNode,
        settings: Settings,
        selectors: Vec<Box<dyn VariantSelector>>,
    ) -> Self {
        Self {
            root,
            resolver: Resolver::new(settings.case_insensitive),
            cache: IdempotencyCache::new(&settings.idempotency, &settings.working_dir),
            settings,
            selectors,
            runner: Arc::new(ShellRunner),
            forwarded_args: Vec::new(),
            origin: None,
            invoked_from: None,
            base_env: BTreeMap::new(),
        }
    }

    /// Replaces the process spawner.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Arguments appended to every leaf command not excluded from forwarding.
    pub fn with_forwarded_args(mut self, args: Vec<String>) -> Self {
        self.forwarded_args = args;
        self
    }

    /// Namespace path that `~` refers to, as exported by a parent invocation.
    pub fn with_origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(ExecutionPath::parse);
        self
    }

    /// Dotted path of the command that started this process. Hooks with that exact path
    /// are skipped so a hook re-invoking `scriptree ~` cannot recurse into itself.
    pub fn with_invoked_from(mut self, script: Option<String>) -> Self {
        self.invoked_from = script.filter(|s| !s.is_empty());
        self
    }

    /// Variables exported to every spawned command, below any `$env` overlay.
    pub fn with_base_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.base_env = env;
        self
    }

    /// Runs the script at `dotted`. The empty path addresses the root.
    pub fn run(&self, dotted: &str, options: &ExecutionOptions) -> Result<(), EngineError> {
        let segments: Vec<String> = if dotted.is_empty() {
            Vec::new()
        } else {
            dotted.split('.').map(str::to_string).collect()
        };

        match segments.split_first() {
            Some((first, rest)) if first == RELATIVE_MARKER => {
                let (node, path) = self.relative_origin();
                log::debug!("Resolving '{}' relative to '{}'", dotted, path);
                self.execute(node, rest, &path, options, 0)
            }
            _ => self.execute(self.root, &segments, &ExecutionPath::root(), options, 0),
        }
    }

    fn relative_origin(&self) -> (&'t ScriptNode, ExecutionPath) {
        let resolved = self.origin.as_ref().and_then(|origin| {
            self.resolver
                .resolve_path(self.root, origin.segments())
                .map_err(|e| log::debug!("Relative origin '{}' is gone: {}", origin, e))
                .ok()
        });
        resolved.unwrap_or((self.root, ExecutionPath::root()))
    }

    fn execute(
        &self,
        node: &ScriptNode,
        residual: &[String],
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        if depth > MAX_DISPATCH_DEPTH {
            return Err(EngineError::RecursionLimit { path: path.clone() });
        }
        log::trace!("Dispatching '{}' with residual {:?}", path, residual);

        match node {
            ScriptNode::Computed(function) => {
                self.execute_computed(function.as_ref(), residual, path, options, depth)
            }
            ScriptNode::Command(text) => match residual.first() {
                Some(segment) => self.not_found(path, Some(segment), options),
                None => self.execute_command(text, path, options),
            },
            ScriptNode::Sequence(_) => self.execute_sequence(node, residual, path, options, depth),
            ScriptNode::Namespace(namespace) => {
                self.execute_namespace(namespace, residual, path, options, depth)
            }
        }
    }

    fn not_found(
        &self,
        container: &ExecutionPath,
        segment: Option<&str>,
        options: &ExecutionOptions,
    ) -> Result<(), EngineError> {
        if options.ignore_not_found {
            log::debug!(
                "Ignoring unresolved '{}' under '{}'",
                segment.unwrap_or("<bare>"),
                container
            );
            return Ok(());
        }
        Err(EngineError::NotFound {
            container: container.clone(),
            segment: segment.map(str::to_string),
        })
    }

    fn execute_computed(
        &self,
        function: &ComputeFn,
        residual: &[String],
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        if !self.settings.quiet {
            println!(
                "{} {} {}",
                "→".blue(),
                "function".yellow(),
                format!("({path})").dimmed()
            );
        }

        let args: &[String] = if options.exclude_args {
            &[]
        } else {
            &self.forwarded_args
        };
        let context = ComputeContext {
            args,
            env: &options.env,
            path,
        };
        let produced = function(&context).map_err(|source| EngineError::FunctionFailed {
            path: path.clone(),
            source,
        })?;

        match produced {
            Some(next) => self.execute(&next, residual, path, &options.excluding_args(), depth + 1),
            None => match residual.first() {
                Some(segment) => self.not_found(path, Some(segment), options),
                None => Ok(()),
            },
        }
    }

    fn execute_command(
        &self,
        text: &str,
        path: &ExecutionPath,
        options: &ExecutionOptions,
    ) -> Result<(), EngineError> {
        let line = if options.exclude_args || self.forwarded_args.is_empty() {
            text.to_string()
        } else {
            executor::join_forwarded_args(text, &self.forwarded_args).map_err(|source| {
                EngineError::Spawn {
                    path: path.clone(),
                    source,
                }
            })?
        };

        if !self.settings.quiet {
            println!("{} {} {}", "→".blue(), line.green(), format!("({path})").dimmed());
        }
        if line.trim().is_empty() {
            return Ok(());
        }

        let mut env = self.base_env.clone();
        env.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert(ENV_PARENT_PATH.to_string(), path.parent().dotted());
        env.insert(ENV_SCRIPT_PATH.to_string(), path.dotted());
        if let Some(code) = options.last_error {
            env.insert(ENV_LAST_ERROR.to_string(), code.to_string());
        }

        let invocation = CommandInvocation {
            command_line: executor::escape_relative_invocation(&line).into_owned(),
            env,
            cwd: self.settings.working_dir.clone(),
        };
        let code = self
            .runner
            .run(&invocation)
            .map_err(|source| EngineError::Spawn {
                path: path.clone(),
                source,
            })?;

        if code == 0 {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                code,
                path: path.clone(),
            })
        }
    }

    fn execute_sequence(
        &self,
        node: &ScriptNode,
        residual: &[String],
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        let (rest, step_options) = match residual.split_first() {
            None => (residual, options.clone()),
            Some((first, rest)) if first == WILDCARD => (rest, options.ignoring_not_found(true)),
            Some((first, rest)) => {
                return match self.resolver.resolve(node, first) {
                    Some((key, child)) => {
                        self.execute(child, rest, &path.child(key), options, depth + 1)
                    }
                    None => self.not_found(path, Some(first), options),
                };
            }
        };

        for (key, item) in self.resolver.fan_out(node) {
            self.execute(item, rest, &path.child(key), &step_options, depth + 1)?;
        }
        Ok(())
    }

    fn plan<'a>(
        &'a self,
        namespace: &'a Namespace,
        residual: &'a [String],
    ) -> Option<Plan<'a>> {
        match residual.split_first() {
            None => self
                .selectors
                .iter()
                .find(|selector| selector.claims(namespace))
                .map(|selector| Plan::Select(selector.as_ref())),
            Some((first, rest)) if first == WILDCARD => Some(Plan::FanOut(
                self.resolver.fan_out_in_namespace(namespace),
                rest,
            )),
            Some((first, rest)) => self
                .resolver
                .resolve_in_namespace(namespace, first)
                .map(|(key, child)| Plan::Child(key, child, rest)),
        }
    }

    /// Walks `residual` below `node` without running anything, up to the first wildcard or
    /// computed node. Returns the container and segment that cannot be resolved, or the
    /// final namespace when no selector claims it.
    fn unresolved(
        &self,
        mut node: &ScriptNode,
        residual: &[String],
        mut path: ExecutionPath,
    ) -> Option<(ExecutionPath, Option<String>)> {
        for segment in residual {
            if segment == WILDCARD || matches!(node, ScriptNode::Computed(_)) {
                return None;
            }
            let Some((key, next)) = self.resolver.resolve(node, segment) else {
                return Some((path, Some(segment.clone())));
            };
            node = next;
            path = path.child(key);
        }
        match node {
            ScriptNode::Namespace(ns) if !self.selectors.iter().any(|s| s.claims(ns)) => {
                Some((path, None))
            }
            _ => None,
        }
    }

    fn execute_namespace(
        &self,
        namespace: &Namespace,
        residual: &[String],
        path: &ExecutionPath,
        inherited: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        let options = match &namespace.env {
            Some(declaration) => inherited
                .with_env(env_file::resolve(declaration, &self.settings.working_dir)),
            None => inherited.clone(),
        };

        let Some(plan) = self.plan(namespace, residual) else {
            return self.not_found(path, residual.first().map(String::as_str), &options);
        };
        if let Plan::Child(key, child, rest) = &plan
            && let Some((container, segment)) = self.unresolved(child, rest, path.child(key.clone()))
        {
            return self.not_found(&container, segment.as_deref(), &options);
        }

        if !self.cache.should_run(namespace, path, &options.env) {
            if !self.settings.quiet {
                println!(
                    "{} {} {}",
                    "→".blue(),
                    "skipped, inputs unchanged".dimmed(),
                    format!("({path})").dimmed()
                );
            }
            log::info!("Skipping '{}': idempotency hash unchanged", path);
            return Ok(());
        }

        let scope = residual.first().map(String::as_str);
        let outcome = self
            .run_hook(namespace, HookKind::Pre, scope, path, &options, depth)
            .and_then(|()| self.run_plan(plan, namespace, path, &options, depth))
            .and_then(|()| self.run_hook(namespace, HookKind::Post, scope, path, &options, depth));

        let outcome = match outcome {
            Err(error) if error.is_recoverable() => {
                self.recover(namespace, scope, error, path, &options, depth)
            }
            other => other,
        };
        let outcome = self.finish(namespace, scope, outcome, path, &options, depth);

        if outcome.is_ok()
            && let Err(e) = self.cache.commit(namespace, path, &options.env)
        {
            log::warn!("{}", e);
        }
        outcome
    }

    fn run_plan(
        &self,
        plan: Plan<'_>,
        namespace: &Namespace,
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        match plan {
            Plan::Select(selector) => {
                log::debug!("Selector '{}' claimed '{}'", selector.name(), path);
                let dispatcher = NestedDispatch {
                    engine: self,
                    depth: depth + 1,
                };
                let request = SelectionRequest {
                    path,
                    options,
                    dispatcher: &dispatcher,
                };
                match selector.select(namespace, &request)? {
                    Selection::Run { node, label } => {
                        self.execute(node, &[], &path.child(label), options, depth + 1)
                    }
                    Selection::Done => Ok(()),
                }
            }
            Plan::FanOut(children, rest) => {
                let fan_options = options.ignoring_not_found(true);
                for (key, child) in children {
                    self.execute(child, rest, &path.child(key), &fan_options, depth + 1)?;
                }
                Ok(())
            }
            Plan::Child(key, child, rest) => {
                self.execute(child, rest, &path.child(key), options, depth + 1)
            }
        }
    }

    /// Runs `_onError` then `_catch`. Returns `Ok` only when a catch hook recovered.
    fn recover(
        &self,
        namespace: &Namespace,
        scope: Option<&str>,
        error: EngineError,
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        let hook_options = options.with_last_error(error.exit_code());
        self.run_hook(namespace, HookKind::OnError, scope, path, &hook_options, depth)?;

        if namespace.hooks.lookup(HookKind::Catch, scope).is_none() {
            return Err(error);
        }
        match self.run_hook(namespace, HookKind::Catch, scope, path, &hook_options, depth) {
            Ok(()) => {
                log::info!("'{}' recovered from: {}", path, error);
                Ok(())
            }
            Err(catch_error) => {
                log::error!("Catch hook of '{}' failed: {}", path, catch_error);
                Err(error)
            }
        }
    }

    /// Runs `_finally` whatever the outcome. Its own failure only surfaces after a success.
    fn finish(
        &self,
        namespace: &Namespace,
        scope: Option<&str>,
        outcome: Result<(), EngineError>,
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        let hook_options = match &outcome {
            Err(error) => options.with_last_error(error.exit_code()),
            Ok(()) => options.clone(),
        };
        match (outcome, self.run_hook(namespace, HookKind::Finally, scope, path, &hook_options, depth)) {
            (outcome, Ok(())) => outcome,
            (Ok(()), Err(finally_error)) => Err(finally_error),
            (Err(error), Err(finally_error)) => {
                log::error!("Finally hook of '{}' failed: {}", path, finally_error);
                Err(error)
            }
        }
    }

    fn run_hook(
        &self,
        namespace: &Namespace,
        kind: HookKind,
        scope: Option<&str>,
        path: &ExecutionPath,
        options: &ExecutionOptions,
        depth: usize,
    ) -> Result<(), EngineError> {
        let Some((key, node)) = namespace.hooks.lookup(kind, scope) else {
            return Ok(());
        };
        let hook_path = path.child(key);

        if kind != HookKind::Catch
            && self.invoked_from.as_deref() == Some(hook_path.dotted().as_str())
        {
            log::debug!("Not re-entering hook '{}' from itself", hook_path);
            return Ok(());
        }
        self.execute(node, &[], &hook_path, &options.excluding_args(), depth + 1)
    }
}

/// Lets selectors re-enter the engine at the current depth.
struct NestedDispatch<'e, 't> {
    engine: &'e Engine<'t>,
    depth: usize,
}

impl Dispatcher for NestedDispatch<'_, '_> {
    fn dispatch(
        &self,
        node: &ScriptNode,
        path: &ExecutionPath,
        options: &ExecutionOptions,
    ) -> Result<(), EngineError> {
        self.engine.execute(node, &[], path, options, self.depth)
    }
}
