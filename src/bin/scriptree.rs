// src/bin/scriptree.rs

use std::collections::BTreeMap;
use std::env;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;

use scriptree::cli::Cli;
use scriptree::constants::{ENV_CONFIG, ENV_PARENT_PATH, ENV_SCRIPT_PATH, EXIT_FAILURE, EXIT_NOT_FOUND};
use scriptree::core::config_loader::{self, LoadedConfig};
use scriptree::core::engine::Engine;
use scriptree::core::resolver::Resolver;
use scriptree::core::{help, selectors};
use scriptree::models::ExecutionOptions;

/// The main entry point of the `scriptree` binary.
/// Sets up logging, loads the configuration and runs each requested path in order.
fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();
    log::debug!("CLI args parsed: {:?}", cli);

    let loaded = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            process::exit(EXIT_FAILURE);
        }
    };

    process::exit(run_cli(cli, &loaded));
}

fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    let cwd = env::current_dir().context("Could not determine the current directory")?;
    let mut loaded = config_loader::load(cli.config.as_deref(), &cwd)?;

    let settings = &mut loaded.settings;
    settings.quiet = cli.quiet;
    settings.idempotency.disabled |= cli.no_idempotency;
    settings.idempotency.use_file_content |= cli.use_file_content;
    Ok(loaded)
}

/// A path written as `\~` on shells that expand a bare `~`.
fn unescape_path(path: &str) -> &str {
    path.strip_prefix('\\')
        .filter(|rest| rest.starts_with('~'))
        .unwrap_or(path)
}

/// Runs or lists the requested paths and returns the process exit code.
fn run_cli(cli: Cli, loaded: &LoadedConfig) -> i32 {
    let resolver = Resolver::new(loaded.settings.case_insensitive);
    let paths: Vec<String> = cli.paths.iter().map(|p| unescape_path(p).to_string()).collect();

    if cli.list || paths.is_empty() {
        return match help::render_listing(&loaded.root, &resolver, &paths) {
            Ok(listing) => {
                println!("{listing}");
                0
            }
            Err(e) => {
                eprintln!("{}", e.to_string().red());
                EXIT_NOT_FOUND
            }
        };
    }

    let selectors = selectors::default_selectors(
        loaded.settings.runtime.as_deref(),
        &loaded.settings.working_dir,
    );
    let base_env = BTreeMap::from([(ENV_CONFIG.to_string(), loaded.path.display().to_string())]);
    let engine = Engine::new(&loaded.root, loaded.settings.clone(), selectors)
        .with_forwarded_args(cli.args)
        .with_origin(env::var(ENV_PARENT_PATH).ok().as_deref())
        .with_invoked_from(env::var(ENV_SCRIPT_PATH).ok())
        .with_base_env(base_env);

    let options = ExecutionOptions::default();
    for path in &paths {
        if let Err(e) = engine.run(path, &options) {
            eprintln!("{}", help::render_error(&loaded.root, &resolver, &e));
            return e.exit_code();
        }
    }
    0
}
