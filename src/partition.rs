// src/partition.rs

//! Split a line-oriented input into per-machine chunks.
//!
//! For `n` lines and `k` machines every chunk gets `n / k` lines and the
//! first `n % k` chunks get one more. Chunks are contiguous and in order, so
//! concatenating them by index reproduces the input. With fewer lines than
//! machines the trailing chunks are empty.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{FleexError, Result};

/// Partition `items` into exactly `k` contiguous slices (`k` is clamped to 1).
pub fn partition<T>(items: &[T], k: usize) -> Vec<&[T]> {
    let k = k.max(1);
    let base = items.len() / k;
    let remainder = items.len() % k;

    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let len = base + usize::from(i < remainder);
        chunks.push(&items[start..start + len]);
        start += len;
    }
    chunks
}

/// Read the non-blank lines of a file, in order.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Split `source` into `k` chunk files under `dir`, named `<prefix>-<n>`.
///
/// Returns one entry per machine index; `None` where the chunk is empty and
/// no file was written. Fails with `EmptyInput` if `source` has no
/// non-blank lines.
pub fn partition_file(
    source: &Path,
    k: usize,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<Option<PathBuf>>> {
    let lines = read_lines(source)?;
    if lines.is_empty() {
        return Err(FleexError::EmptyInput(source.display().to_string()));
    }

    fs::create_dir_all(dir)?;

    let mut paths = Vec::with_capacity(k);
    for (n, chunk) in partition(&lines, k).into_iter().enumerate() {
        if chunk.is_empty() {
            paths.push(None);
            continue;
        }
        let path = dir.join(format!("{prefix}-{n}"));
        let mut body = chunk.join("\n");
        body.push('\n');
        fs::write(&path, body)?;
        debug!(chunk = n, lines = chunk.len(), path = %path.display(), "wrote input chunk");
        paths.push(Some(path));
    }

    Ok(paths)
}
