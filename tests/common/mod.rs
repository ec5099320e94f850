#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleex::config::RunConfig;
use fleex::engine::{Collaborators, TracingProgress};
use fleex::fleet::StaticInventory;
use fleex_test_utils::builders::machines_of;
use fleex_test_utils::fake_remote::FakeConnector;

pub const TS: u64 = 1_700_000_000_000;

/// Run config rooted in `tmp`, with a fixed timestamp and fast retries.
pub fn run_config(tmp: &Path) -> RunConfig {
    let mut cfg = RunConfig::new(TS);
    cfg.tmp_root = tmp.to_path_buf();
    cfg.default_timeout = Duration::from_secs(5);
    cfg.retry_backoff = Duration::from_millis(10);
    cfg
}

/// Collaborators over a `name-1..name-n` static fleet and `connector`.
pub fn collaborators(name: &str, n: usize, connector: &FakeConnector) -> Collaborators {
    Collaborators {
        provider: Arc::new(StaticInventory::new(machines_of(name, n))),
        connector: Arc::new(connector.clone()),
        progress: Arc::new(TracingProgress),
    }
}

pub fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(&path, body).unwrap();
    path
}

/// Remote namespace root of `label` for the fixed test timestamp.
pub fn remote_root(label: &str) -> String {
    format!("/tmp/fleex-{TS}-{label}")
}
