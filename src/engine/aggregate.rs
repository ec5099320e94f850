// src/engine/aggregate.rs

//! Fan-in of per-machine output files.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::OutputPolicy;
use crate::errors::{FleexError, Result};
use crate::types::AggregateStrategy;

/// Merge already-split per-machine line lists, in machine-index order.
pub fn merge_lines(per_machine: Vec<Vec<String>>, policy: OutputPolicy) -> Vec<String> {
    match policy.aggregate {
        AggregateStrategy::SortUnique => per_machine
            .into_iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        AggregateStrategy::Concat if policy.deduplicate => {
            let mut seen = HashSet::new();
            per_machine
                .into_iter()
                .flatten()
                .filter(|line| seen.insert(line.clone()))
                .collect()
        }
        AggregateStrategy::Concat => per_machine.into_iter().flatten().collect(),
    }
}

/// Merged file contents: lines joined by `\n` with one trailing newline.
/// No lines render as an empty file.
pub fn render(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Read `files` (in machine-index order), merge them, write `destination`.
///
/// Returns the number of lines written. Nothing is written when `files` is
/// empty.
pub fn aggregate(files: &[PathBuf], policy: OutputPolicy, destination: &Path) -> Result<usize> {
    if files.is_empty() {
        return Err(FleexError::NoOutputFiles);
    }

    let mut per_machine = Vec::with_capacity(files.len());
    for file in files {
        let content = fs::read_to_string(file)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        debug!(file = %file.display(), lines = lines.len(), "output read");
        per_machine.push(lines);
    }

    let merged = merge_lines(per_machine, policy);
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(destination, render(&merged))?;
    Ok(merged.len())
}
