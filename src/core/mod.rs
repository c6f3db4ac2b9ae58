// src/core/mod.rs

pub mod config_loader;
pub mod engine;
pub mod env_file;
pub mod help;
pub mod idempotency;
pub mod paths;
pub mod pattern;
pub mod resolver;
pub mod selectors;
pub mod tree_builder;
