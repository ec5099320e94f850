// src/engine/outcome.rs

//! Per-step and per-machine results.
//!
//! A [`MachineResult`] is produced exactly once per machine per run and is
//! never mutated after the worker that built it returns.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ErrorKind, FleexError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    /// Captured remote output (stdout then stderr).
    pub output: String,
    /// Attempts beyond the first.
    pub retries: u32,
    pub duration: Duration,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl StepResult {
    pub fn succeeded(name: &str, output: String, retries: u32, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            output,
            retries,
            duration,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(
        name: &str,
        output: String,
        retries: u32,
        duration: Duration,
        err: &FleexError,
    ) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            output,
            retries,
            duration,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineResult {
    /// Position in the fleet.
    pub index: usize,
    pub label: String,
    pub success: bool,
    /// The machine had no chunk for this run and did no work.
    pub skipped: bool,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Local copy of this machine's final output, if retrieved.
    pub output_file: Option<PathBuf>,
    pub duration: Duration,
}

impl MachineResult {
    pub fn new(index: usize, label: &str) -> Self {
        Self {
            index,
            label: label.to_string(),
            success: false,
            skipped: false,
            steps: Vec::new(),
            error: None,
            error_kind: None,
            output_file: None,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(index: usize, label: &str) -> Self {
        Self {
            skipped: true,
            ..Self::new(index, label)
        }
    }

    /// Mark failed with `err`, keeping any step results collected so far.
    pub fn fail(&mut self, err: &FleexError) {
        self.success = false;
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
    }

    pub fn failed(&self) -> bool {
        !self.success && !self.skipped
    }
}
