// src/engine/layout.rs

//! Local and remote temporary paths for one run.
//!
//! Local:  `<tmp-root>/fleex-workflow-<ts>/input/chunk-<fleet>-<n>`
//!         `<tmp-root>/fleex-workflow-<ts>/output/output-<label>`
//! Remote: `<remote-tmp>/fleex-<ts>-<label>/...`
//!
//! Keying every path by the run timestamp (and the remote ones also by
//! machine label) keeps concurrent runs and sibling machines apart.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(tmp_root: &Path, timestamp: u64) -> Self {
        Self {
            root: tmp_root.join(format!("fleex-workflow-{timestamp}")),
        }
    }

    /// Create `input/` and `output/`.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(self.input_dir())?;
        fs::create_dir_all(self.output_dir())?;
        debug!(root = %self.root.display(), "run directory created");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Prefix for primary-input chunks; files are `<prefix>-<n>`.
    pub fn chunk_prefix(fleet: &str) -> String {
        format!("chunk-{fleet}")
    }

    /// Prefix for split-variable chunks.
    pub fn split_prefix(fleet: &str, var: &str) -> String {
        format!("chunk-{fleet}-{var}")
    }

    pub fn output_file(&self, label: &str) -> PathBuf {
        self.output_dir().join(format!("output-{label}"))
    }

    /// Remove the whole run tree. Failures are logged only.
    pub fn cleanup(&self) {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "run directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "failed to remove run directory"),
        }
    }
}

/// One machine's remote namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    root: String,
}

impl RemoteLayout {
    pub fn new(remote_tmp_root: &str, timestamp: u64, label: &str) -> Self {
        Self {
            root: format!(
                "{}/fleex-{}-{}",
                remote_tmp_root.trim_end_matches('/'),
                timestamp,
                label
            ),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Where this machine's input chunk (or the shared input) lands.
    pub fn input(&self) -> String {
        format!("{}/input", self.root)
    }

    pub fn split_chunk(&self, var: &str) -> String {
        format!("{}/split-{}", self.root, var)
    }

    /// Fresh output path for step `index` (0-based).
    pub fn step_output(&self, index: usize) -> String {
        format!("{}/step-{}.out", self.root, index)
    }
}
