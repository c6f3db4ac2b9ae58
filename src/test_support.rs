//! Test-only helpers for observing spawned commands without starting processes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::system::executor::{CommandInvocation, CommandRunner, ExecutionError};

/// Records every invocation and answers with a configured exit code (0 by default).
#[derive(Debug, Default)]
pub struct RecordingRunner {
    seen: Mutex<Vec<CommandInvocation>>,
    exit_codes: HashMap<String, i32>,
}

impl RecordingRunner {
    /// A runner where each listed command line exits with the paired code.
    pub fn failing(codes: &[(&str, i32)]) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            exit_codes: codes.iter().map(|(c, code)| (c.to_string(), *code)).collect(),
        }
    }

    /// Command lines in spawn order.
    pub fn commands(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|invocation| invocation.command_line.clone())
            .collect()
    }

    /// The first invocation of `command_line`.
    pub fn invocation(&self, command_line: &str) -> Option<CommandInvocation> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|invocation| invocation.command_line == command_line)
            .cloned()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &CommandInvocation) -> Result<i32, ExecutionError> {
        self.seen.lock().unwrap().push(invocation.clone());
        Ok(self
            .exit_codes
            .get(&invocation.command_line)
            .copied()
            .unwrap_or(0))
    }
}
