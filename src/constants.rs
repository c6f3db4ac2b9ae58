// src/constants.rs

/// The name of the binary, used to recognise relative self-invocations inside commands.
pub const BIN_NAME: &str = "scriptree";

/// The configuration files probed in the working directory, in order.
pub const CONFIG_FILENAMES: &[&str] = &["scriptree.toml", "scriptree.json"];

/// Default location of the idempotency records, relative to the working directory.
pub const DEFAULT_IDEMPOTENCY_LOCATION: &str = ".scriptree/idempotency";

/// Default runtime probed for `_<runtime><major>` variant keys.
pub const DEFAULT_RUNTIME: &str = "node";

// --- Environment variables exchanged with spawned commands ---

/// Dotted path of the namespace that spawned a command.
pub const ENV_PARENT_PATH: &str = "SCRIPTREE_PATH";

/// Dotted path of the spawned command itself.
pub const ENV_SCRIPT_PATH: &str = "SCRIPTREE_SCRIPT";

/// Exit code of the failure being handled by `_onError`, `_catch` and `_finally`.
pub const ENV_LAST_ERROR: &str = "SCRIPTREE_ERROR";

/// Configuration file used by the current invocation.
pub const ENV_CONFIG: &str = "SCRIPTREE_CONFIG";

/// When set to `true`, every `$idempotency` declaration is ignored.
pub const ENV_DISABLE_IDEMPOTENCY: &str = "SCRIPTREE_DISABLE_IDEMPOTENCY";

// --- Exit codes ---

/// Exit code for a path that does not resolve.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code for an uncaught failure that carries no process exit code.
pub const EXIT_FAILURE: i32 = 1;

/// Upper bound on nested dispatches, guards against computed nodes that keep returning nodes.
pub const MAX_DISPATCH_DEPTH: usize = 256;

/// File name replacement for `*` segments in idempotency record names.
pub const WILDCARD_PLACEHOLDER: &str = "__all__";
