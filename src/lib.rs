//! # scriptree
//!
//! A script runner driven by a tree of namespaces declared in TOML or JSON.
//!
//! Scripts are addressed by dotted paths. Namespaces carry lifecycle hooks
//! (`_pre`, `_post`, `_onError`, `_catch`, `_finally`), environment overlays (`$env`),
//! platform and CI variants, and idempotency keys that skip work whose inputs
//! have not changed since the last successful run.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

#[cfg(test)]
pub(crate) mod test_support;
