// src/cli.rs

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// scriptree: run scripts organized as a tree of namespaces.
///
/// Each PATH is a dotted address into the `scripts` table of the configuration,
/// e.g. `build.release` or `test.*`. Paths starting with `~` are resolved
/// relative to the namespace of the script that invoked this process.
///
/// Arguments after `--` are appended to every leaf command that runs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Dotted script paths to run, in order.
    ///
    /// With no paths the available scripts are listed.
    pub paths: Vec<String>,

    /// Arguments forwarded to the executed commands.
    #[arg(last = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Path to the configuration file.
    ///
    /// Defaults to `SCRIPTREE_CONFIG`, then `scriptree.toml` or `scriptree.json`
    /// in the current directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List the scripts under the given paths instead of running them.
    #[arg(short, long)]
    pub list: bool,

    /// Do not echo commands before running them.
    #[arg(short, long)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Run every script even when its idempotency inputs are unchanged.
    #[arg(long)]
    pub no_idempotency: bool,

    /// Hash file contents instead of timestamps for `file:`, `dir:` and `glob:` keys.
    #[arg(long)]
    pub use_file_content: bool,
}

impl Cli {
    /// The `env_logger` filter matching the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_paths_flags_and_forwarded_args() {
        let cli = Cli::try_parse_from([
            "scriptree", "-q", "-vv", "--config", "ci.toml", "build.release", "test", "--", "--nocapture", "-x",
        ])
        .unwrap();
        assert_eq!(cli.paths, vec!["build.release", "test"]);
        assert_eq!(cli.args, vec!["--nocapture", "-x"]);
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        assert!(cli.quiet);
        assert!(!cli.list);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_no_paths_is_allowed() {
        let cli = Cli::try_parse_from(["scriptree", "--no-idempotency"]).unwrap();
        assert!(cli.paths.is_empty());
        assert!(cli.no_idempotency);
        assert_eq!(cli.log_level(), "warn");
    }
}
