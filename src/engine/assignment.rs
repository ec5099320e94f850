// src/engine/assignment.rs

//! Machine index → chunk files.
//!
//! Built completely before any worker starts, then shared read-only behind
//! an `Arc`. Workers never add chunks lazily.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Workflow;
use crate::engine::layout::RunLayout;
use crate::engine::workflow::effective_scale_mode;
use crate::errors::{FleexError, Result};
use crate::fleet::Fleet;
use crate::partition::partition_file;
use crate::template::Vars;
use crate::types::ScaleMode;

#[derive(Debug, Clone, Default)]
pub struct ChunkAssignment {
    /// Per-machine chunks of the primary input (horizontal runs only).
    input: Option<Vec<Option<PathBuf>>>,
    /// Whole primary input, sent to every machine when it is not split.
    shared_input: Option<PathBuf>,
    /// Per-machine chunks of each split-variable's file.
    splits: BTreeMap<String, Vec<Option<PathBuf>>>,
}

impl ChunkAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_chunks(mut self, chunks: Vec<Option<PathBuf>>) -> Self {
        self.input = Some(chunks);
        self
    }

    pub fn with_shared_input(mut self, path: PathBuf) -> Self {
        self.shared_input = Some(path);
        self
    }

    pub fn with_split(mut self, var: impl Into<String>, chunks: Vec<Option<PathBuf>>) -> Self {
        self.splits.insert(var.into(), chunks);
        self
    }

    /// Partition everything `workflow` needs for `fleet`.
    ///
    /// - Any horizontal step: `input` is required and split into
    ///   `input/chunk-<fleet>-<n>`.
    /// - Otherwise an `input`, if given, is shared whole.
    /// - Each vertical step's split-var names a local file (the variable's
    ///   value), split into `input/chunk-<fleet>-<var>-<n>`.
    pub fn prepare(
        workflow: &Workflow,
        run_mode: ScaleMode,
        input: Option<&Path>,
        vars: &Vars,
        fleet: &Fleet,
        layout: &RunLayout,
    ) -> Result<Self> {
        let k = fleet.len();
        let mut assignment = ChunkAssignment::new();

        let modes: Vec<ScaleMode> = workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| effective_scale_mode(i, step, run_mode))
            .collect();

        if modes.contains(&ScaleMode::Horizontal) {
            let input = input.ok_or_else(|| {
                FleexError::ConfigError(
                    "horizontal scale mode requires an input file".to_string(),
                )
            })?;
            let chunks = partition_file(
                input,
                k,
                &layout.input_dir(),
                &RunLayout::chunk_prefix(&fleet.name),
            )?;
            info!(
                input = %input.display(),
                machines = k,
                chunks = chunks.iter().flatten().count(),
                "primary input partitioned"
            );
            assignment = assignment.with_input_chunks(chunks);
        } else if let Some(input) = input {
            assignment = assignment.with_shared_input(input.to_path_buf());
        }

        for (step, mode) in workflow.steps.iter().zip(modes.iter()) {
            if *mode != ScaleMode::Vertical {
                continue;
            }
            let Some(ref var) = step.split_var else {
                return Err(FleexError::ConfigError(format!(
                    "step '{}' runs vertically but declares no split-var",
                    step.name
                )));
            };
            if assignment.splits.contains_key(var) {
                continue;
            }
            let source = vars.get(var).ok_or_else(|| FleexError::MissingRequiredVar(var.clone()))?;
            let chunks = partition_file(
                Path::new(source),
                k,
                &layout.input_dir(),
                &RunLayout::split_prefix(&fleet.name, var),
            )?;
            info!(
                var = %var,
                source,
                chunks = chunks.iter().flatten().count(),
                "split-variable partitioned"
            );
            assignment = assignment.with_split(var.clone(), chunks);
        }

        Ok(assignment)
    }

    pub fn input_chunk(&self, index: usize) -> Option<&Path> {
        self.input
            .as_ref()
            .and_then(|chunks| chunks.get(index))
            .and_then(|c| c.as_deref())
    }

    pub fn shared_input(&self) -> Option<&Path> {
        self.shared_input.as_deref()
    }

    pub fn split_chunk(&self, var: &str, index: usize) -> Option<&Path> {
        self.splits
            .get(var)
            .and_then(|chunks| chunks.get(index))
            .and_then(|c| c.as_deref())
    }

    pub fn split_vars(&self) -> impl Iterator<Item = &str> {
        self.splits.keys().map(String::as_str)
    }

    pub fn is_horizontal(&self) -> bool {
        self.input.is_some()
    }

    /// Whether machine `index` has every chunk it needs.
    ///
    /// A machine missing any chunk (primary or split-variable) is skipped
    /// for the whole pipeline.
    pub fn has_work(&self, index: usize) -> bool {
        let input_ok = !self.is_horizontal() || self.input_chunk(index).is_some();
        let splits_ok = self
            .splits
            .keys()
            .all(|var| self.split_chunk(var, index).is_some());
        input_ok && splits_ok
    }
}
