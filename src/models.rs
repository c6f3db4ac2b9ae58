// src/models.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::constants::{DEFAULT_IDEMPOTENCY_LOCATION, DEFAULT_RUNTIME};

// --- SCRIPT TREE ---

/// Signature of a computed node: receives the invocation context and returns the node to run next.
pub type ComputeFn =
    dyn Fn(&ComputeContext<'_>) -> anyhow::Result<Option<ScriptNode>> + Send + Sync;

/// A node of the script tree. Trees are immutable once built.
#[derive(Clone)]
pub enum ScriptNode {
    /// A shell command line.
    Command(String),
    /// Ordered steps, addressable by index.
    Sequence(Vec<ScriptNode>),
    /// Named sub-scripts plus hooks, variants and metadata.
    Namespace(Box<Namespace>),
    /// An opaque callable producing another node (or nothing) at run time.
    Computed(Arc<ComputeFn>),
}

impl ScriptNode {
    /// Creates a `Command` node.
    pub fn command(text: impl Into<String>) -> Self {
        Self::Command(text.into())
    }

    /// Creates a `Sequence` node.
    pub fn sequence(items: impl IntoIterator<Item = ScriptNode>) -> Self {
        Self::Sequence(items.into_iter().collect())
    }

    /// Creates a `Computed` node from a closure.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&ComputeContext<'_>) -> anyhow::Result<Option<ScriptNode>> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Returns the namespace if this node is one.
    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            Self::Namespace(ns) => Some(ns),
            _ => None,
        }
    }
}

impl From<Namespace> for ScriptNode {
    fn from(value: Namespace) -> Self {
        Self::Namespace(Box::new(value))
    }
}

impl fmt::Debug for ScriptNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(text) => f.debug_tuple("Command").field(text).finish(),
            Self::Sequence(items) => f.debug_tuple("Sequence").field(items).finish(),
            Self::Namespace(ns) => f.debug_tuple("Namespace").field(ns).finish(),
            Self::Computed(_) => f.write_str("Computed(<function>)"),
        }
    }
}

/// What a computed node sees when it is invoked.
#[derive(Debug)]
pub struct ComputeContext<'a> {
    /// Arguments forwarded from the command line.
    pub args: &'a [String],
    /// Environment overlay accumulated from ancestor `$env` declarations.
    pub env: &'a BTreeMap<String, String>,
    /// Where the node sits in the tree.
    pub path: &'a ExecutionPath,
}

/// The lifecycle hooks a namespace may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// `_pre`: runs before the selected script.
    Pre,
    /// `_post`: runs after the selected script succeeded.
    Post,
    /// `_onError`: observes a failure.
    OnError,
    /// `_catch`: recovers from a failure.
    Catch,
    /// `_finally`: always runs last.
    Finally,
}

impl HookKind {
    /// Every hook kind, in lifecycle order.
    pub const ALL: [Self; 5] = [Self::Pre, Self::Post, Self::OnError, Self::Catch, Self::Finally];

    /// The key that declares this hook.
    pub fn key(self) -> &'static str {
        match self {
            Self::Pre => "_pre",
            Self::Post => "_post",
            Self::OnError => "_onError",
            Self::Catch => "_catch",
            Self::Finally => "_finally",
        }
    }

    /// Splits a key like `_pre_build` into its hook kind and scope segment.
    /// Returns `None` when the key does not declare a hook.
    pub fn parse_key(key: &str) -> Option<(Self, Option<&str>)> {
        Self::ALL.into_iter().find_map(|kind| {
            let rest = key.strip_prefix(kind.key())?;
            if rest.is_empty() {
                Some((kind, None))
            } else {
                rest.strip_prefix('_')
                    .filter(|scope| !scope.is_empty())
                    .map(|scope| (kind, Some(scope)))
            }
        })
    }
}

/// A hook declared generically and/or scoped to the first residual segment.
#[derive(Debug, Clone, Default)]
pub struct HookSlot {
    /// The unsuffixed hook (`_pre`).
    pub generic: Option<ScriptNode>,
    /// Suffixed hooks (`_pre_build`), keyed by segment.
    pub scoped: Vec<(String, ScriptNode)>,
}

/// The five hook slots of a namespace.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pre: HookSlot,
    post: HookSlot,
    on_error: HookSlot,
    catch: HookSlot,
    finally: HookSlot,
}

impl Hooks {
    /// Returns the slot for a hook kind.
    pub fn slot(&self, kind: HookKind) -> &HookSlot {
        match kind {
            HookKind::Pre => &self.pre,
            HookKind::Post => &self.post,
            HookKind::OnError => &self.on_error,
            HookKind::Catch => &self.catch,
            HookKind::Finally => &self.finally,
        }
    }

    fn slot_mut(&mut self, kind: HookKind) -> &mut HookSlot {
        match kind {
            HookKind::Pre => &mut self.pre,
            HookKind::Post => &mut self.post,
            HookKind::OnError => &mut self.on_error,
            HookKind::Catch => &mut self.catch,
            HookKind::Finally => &mut self.finally,
        }
    }

    /// Declares a hook, replacing any previous declaration with the same key.
    pub fn set(&mut self, kind: HookKind, scope: Option<&str>, node: ScriptNode) {
        let slot = self.slot_mut(kind);
        match scope {
            None => slot.generic = Some(node),
            Some(segment) => {
                slot.scoped.retain(|(s, _)| s != segment);
                slot.scoped.push((segment.to_string(), node));
            }
        }
    }

    /// Finds the hook to run: the variant scoped to `scope` wins over the generic one.
    /// Returns the declaring key along with the node.
    pub fn lookup(&self, kind: HookKind, scope: Option<&str>) -> Option<(String, &ScriptNode)> {
        let slot = self.slot(kind);
        let scoped = scope.and_then(|segment| {
            slot.scoped
                .iter()
                .find(|(s, _)| s == segment)
                .map(|(s, node)| (format!("{}_{}", kind.key(), s), node))
        });
        scoped.or_else(|| slot.generic.as_ref().map(|node| (kind.key().to_string(), node)))
    }

    /// Finds a hook by its exact declaring key (`_pre`, `_catch_test`, ...).
    pub fn by_key(&self, key: &str) -> Option<&ScriptNode> {
        let (kind, scope) = HookKind::parse_key(key)?;
        let slot = self.slot(kind);
        match scope {
            None => slot.generic.as_ref(),
            Some(segment) => slot.scoped.iter().find(|(s, _)| s == segment).map(|(_, n)| n),
        }
    }

}

/// A `$env` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvDeclaration {
    /// Literal variables, in declaration order.
    Inline(Vec<(String, String)>),
    /// A dotenv file, relative to the working directory.
    File(String),
    /// Several declarations merged left to right.
    Many(Vec<EnvDeclaration>),
}

/// A single typed idempotency key such as `file:Cargo.lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKey {
    /// `static:<value>`: the literal value.
    Static(String),
    /// `env:<name>`: the variable name and its value.
    Env(String),
    /// `file:<path>`: the file's timestamps or content.
    File(String),
    /// `dir:<path>`: every entry below the directory.
    Dir(String),
    /// `glob:<pattern>`: every path matched by the pattern.
    Glob(String),
    /// Anything else; hashed as its literal text.
    Unknown(String),
}

impl IdempotencyKey {
    /// Parses a `<type>:<value>` key. Never fails, unknown types are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some(("static", value)) => Self::Static(value.to_string()),
            Some(("env", value)) => Self::Env(value.to_string()),
            Some(("file", value)) => Self::File(value.to_string()),
            Some(("dir", value)) => Self::Dir(value.to_string()),
            Some(("glob", value)) => Self::Glob(value.to_string()),
            _ => Self::Unknown(raw.to_string()),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(v) => write!(f, "static:{v}"),
            Self::Env(v) => write!(f, "env:{v}"),
            Self::File(v) => write!(f, "file:{v}"),
            Self::Dir(v) => write!(f, "dir:{v}"),
            Self::Glob(v) => write!(f, "glob:{v}"),
            Self::Unknown(v) => f.write_str(v),
        }
    }
}

/// A `$idempotency` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyDeclaration {
    /// `"static:1"`
    Single(IdempotencyKey),
    /// `["file:a", "dir:b"]`
    List(Vec<IdempotencyKey>),
    /// `{ inputs = ["dir:src"], lock = "file:Cargo.lock" }`. Labels are cosmetic.
    Labeled(Vec<(String, Vec<IdempotencyKey>)>),
}

impl IdempotencyDeclaration {
    /// Flattens the declaration into the ordered key sequence that feeds the hash.
    pub fn keys(&self) -> Vec<&IdempotencyKey> {
        match self {
            Self::Single(key) => vec![key],
            Self::List(keys) => keys.iter().collect(),
            Self::Labeled(groups) => groups.iter().flat_map(|(_, keys)| keys.iter()).collect(),
        }
    }
}

/// A keyed node: sub-scripts, variants, hooks and metadata.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    /// Ordinary sub-scripts, in declaration order.
    pub entries: Vec<(String, ScriptNode)>,
    /// Non-hook `_` keys (`_default`, `_ci`, `_linux`, `_concurrently`, ...).
    pub variants: Vec<(String, ScriptNode)>,
    /// Lifecycle hooks.
    pub hooks: Hooks,
    /// `$env`
    pub env: Option<EnvDeclaration>,
    /// `$alias`
    pub aliases: Vec<String>,
    /// `$idempotency`
    pub idempotency: Option<IdempotencyDeclaration>,
    /// `$idempotencyEnabled`
    pub idempotency_enabled: Option<bool>,
    /// `$description`
    pub description: Option<String>,
}

impl Namespace {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child under `key`, routing `_`-prefixed keys to hooks or variants.
    /// Metadata (`$`) keys are not accepted here; use the dedicated builders.
    pub fn with(mut self, key: &str, node: impl Into<ScriptNode>) -> Self {
        self.insert(key, node.into());
        self
    }

    /// In-place form of [`Namespace::with`].
    pub fn insert(&mut self, key: &str, node: ScriptNode) {
        if let Some((kind, scope)) = HookKind::parse_key(key) {
            self.hooks.set(kind, scope, node);
            return;
        }
        let target = if key.starts_with('_') {
            &mut self.variants
        } else {
            &mut self.entries
        };
        match target.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = node,
            None => target.push((key.to_string(), node)),
        }
    }

    /// Sets `$env`.
    pub fn with_env(mut self, env: EnvDeclaration) -> Self {
        self.env = Some(env);
        self
    }

    /// Adds a `$alias`.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Sets `$idempotency`.
    pub fn with_idempotency(mut self, declaration: IdempotencyDeclaration) -> Self {
        self.idempotency = Some(declaration);
        self
    }

    /// Sets `$description`.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Looks up an ordinary entry.
    pub fn entry(&self, key: &str) -> Option<&ScriptNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    /// Looks up a variant such as `_default`.
    pub fn variant(&self, key: &str) -> Option<&ScriptNode> {
        self.variants.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    /// Looks up any addressable key: entries, then variants, then hooks.
    pub fn get(&self, key: &str) -> Option<&ScriptNode> {
        self.entry(key)
            .or_else(|| self.variant(key))
            .or_else(|| self.hooks.by_key(key))
    }

    /// Every addressable key: entries, then variants, then hooks.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .chain(self.variants.iter())
            .map(|(k, _)| k.clone())
            .collect();
        for kind in HookKind::ALL {
            let slot = self.hooks.slot(kind);
            if slot.generic.is_some() {
                keys.push(kind.key().to_string());
            }
            keys.extend(slot.scoped.iter().map(|(s, _)| format!("{}_{}", kind.key(), s)));
        }
        keys
    }

    /// Whether `$idempotency` is declared and not switched off.
    pub fn idempotency_active(&self) -> bool {
        self.idempotency.is_some() && self.idempotency_enabled.unwrap_or(true)
    }
}

// --- EXECUTION STATE ---

/// The segments leading from the root to the node being executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExecutionPath(Vec<String>);

impl ExecutionPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a dotted path. The empty string is the root.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            Self::root()
        } else {
            Self(dotted.split('.').map(str::to_string).collect())
        }
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The segments of the path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The path without its last segment.
    pub fn parent(&self) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The dotted form, e.g. `build.prod`.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Per-call options threaded through the recursion. Copied on descent, never shared.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Do not append forwarded arguments to commands.
    pub exclude_args: bool,
    /// Treat unresolved paths as no-ops.
    pub ignore_not_found: bool,
    /// Accumulated `$env` overrides.
    pub env: BTreeMap<String, String>,
    /// Exit code of the failure currently being handled, exposed to hooks.
    pub last_error: Option<i32>,
}

impl ExecutionOptions {
    /// Copy with forwarded arguments suppressed.
    pub fn excluding_args(&self) -> Self {
        Self {
            exclude_args: true,
            ..self.clone()
        }
    }

    /// Copy with `ignore_not_found` set to `value`.
    pub fn ignoring_not_found(&self, value: bool) -> Self {
        Self {
            ignore_not_found: value,
            ..self.clone()
        }
    }

    /// Copy with `overrides` layered on top of the current environment.
    pub fn with_env<I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut next = self.clone();
        next.env.extend(overrides);
        next
    }

    /// Copy carrying the exit code of the failure being handled.
    pub fn with_last_error(&self, code: i32) -> Self {
        Self {
            last_error: Some(code),
            ..self.clone()
        }
    }
}

// --- SETTINGS ---

/// How idempotency records are computed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencySettings {
    /// Directory holding the `.hash` records.
    pub location: PathBuf,
    /// Hash file contents instead of timestamps.
    pub use_file_content: bool,
    /// Ignore every `$idempotency` declaration.
    pub disabled: bool,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            location: PathBuf::from(DEFAULT_IDEMPOTENCY_LOCATION),
            use_file_content: false,
            disabled: false,
        }
    }
}

/// Global settings supplied by the configuration loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory commands run in and relative paths resolve against.
    pub working_dir: PathBuf,
    /// Fall back to case-insensitive key matching.
    pub case_insensitive: bool,
    /// Runtime whose version selects `_<runtime><major>` variants.
    pub runtime: Option<String>,
    /// Do not echo commands before running them.
    pub quiet: bool,
    /// Idempotency behaviour.
    pub idempotency: IdempotencySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            case_insensitive: false,
            runtime: Some(DEFAULT_RUNTIME.to_string()),
            quiet: false,
            idempotency: IdempotencySettings::default(),
        }
    }
}
