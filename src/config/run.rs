// src/config/run.rs

//! Run-scoped configuration.
//!
//! One [`RunConfig`] is built per invocation and passed by reference (behind
//! an `Arc`) to the worker pool and every pipeline runner. Nothing here is
//! global; two runs in the same process never share credentials or paths.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::model::FleexConfig;

/// Credentials and connection options for the remote-shell transport.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub user: String,
    pub port: u16,
    pub key: Option<PathBuf>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Names this run's multiplexing sockets; the run timestamp.
    pub session_tag: String,
}

impl Default for SshCredentials {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            key: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            session_tag: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Keys the local temp tree and every remote namespace of this run.
    pub timestamp: u64,
    pub ssh: SshCredentials,
    /// Parent of `fleex-workflow-<timestamp>/`.
    pub tmp_root: PathBuf,
    /// Parent of each machine's `fleex-<timestamp>-<label>/` namespace.
    pub remote_tmp_root: String,
    /// Deadline for any remote command without a declared timeout.
    pub default_timeout: Duration,
    /// Wait between failed build-step attempts.
    pub retry_backoff: Duration,
    /// Worker-pool width; `None` means one worker per machine.
    pub concurrency: Option<usize>,
    /// Keep the local run directory after the run.
    pub keep_temp: bool,
}

impl RunConfig {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ssh: SshCredentials {
                session_tag: timestamp.to_string(),
                ..SshCredentials::default()
            },
            tmp_root: std::env::temp_dir(),
            remote_tmp_root: "/tmp".to_string(),
            default_timeout: Duration::from_secs(30 * 60),
            retry_backoff: Duration::from_secs(2),
            concurrency: None,
            keep_temp: false,
        }
    }

    /// Build the run config from `Fleex.toml`, stamped with the current time.
    pub fn from_operator_config(cfg: &FleexConfig) -> Self {
        let section = &cfg.config;
        let timestamp = now_millis();
        Self {
            timestamp,
            ssh: SshCredentials {
                user: cfg.ssh.user.clone(),
                port: cfg.ssh.port,
                key: cfg.ssh.key.as_ref().map(|k| expand_home(k)),
                password: cfg.ssh.password.clone(),
                connect_timeout: cfg.ssh.connect_timeout.as_duration(),
                session_tag: timestamp.to_string(),
            },
            tmp_root: section.tmp_root.clone().unwrap_or_else(std::env::temp_dir),
            remote_tmp_root: section.remote_tmp_root.clone(),
            default_timeout: section.default_timeout.as_duration(),
            retry_backoff: section.retry_backoff.as_duration(),
            concurrency: section.concurrency,
            keep_temp: section.keep_temp,
        }
    }
}

/// Milliseconds since the Unix epoch; the run timestamp.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
