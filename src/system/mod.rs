//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It serves as a boundary between the core engine and the specifics of process management
//! and host detection.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns leaf commands through the platform shell with an environment
//!   overlay, captures output for short probes, and prepares command lines (forwarded
//!   arguments, relative self-invocations).
//! - **`platform`**: Describes the host (OS, architecture, runtime version) and detects CI
//!   services, feeding the platform and CI variant selectors.

pub mod executor;
pub mod platform;
