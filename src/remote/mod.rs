// src/remote/mod.rs

//! Remote-shell transport interface.
//!
//! The engine talks to a [`Connector`] / [`RemoteSession`] pair instead of a
//! concrete SSH client, so tests can plug in a scripted in-memory remote
//! while production uses [`ssh::SshConnector`].
//!
//! Every command the engine issues goes through [`run_with_timeout`], which
//! puts a hard local deadline on the call. Dropping the in-flight future on
//! expiry kills the transport process; the SSH session additionally wraps
//! the remote command in `timeout(1)` so the remote side is killed too.

pub mod ssh;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::config::SshCredentials;
use crate::errors::{FleexError, Result};
use crate::fleet::Machine;
use crate::types::BoxFuture;

pub use ssh::{SshConnector, SshSession};

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// One exclusive connection to one machine. Never shared between workers.
pub trait RemoteSession: Send {
    /// Run `command` through the remote shell. `timeout` is a hint the
    /// implementation uses to bound the remote process.
    fn run<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput>>;

    fn send_file<'a>(&'a mut self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>>;

    fn receive_file<'a>(&'a mut self, remote: &'a str, local: &'a Path)
    -> BoxFuture<'a, Result<()>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens sessions. Shared by all workers of a run.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        machine: &'a Machine,
        creds: &'a SshCredentials,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteSession>>>;
}

/// Bound any transport call by `timeout`, reporting expiry as `TimeoutFailure`.
///
/// The future is dropped on expiry, which cancels the in-flight call.
pub async fn with_deadline<T>(
    fut: impl Future<Output = Result<T>>,
    timeout: Duration,
    what: &str,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(what, ?timeout, "remote call exceeded its deadline; cancelled");
            Err(FleexError::TimeoutFailure {
                what: what.to_string(),
                after: timeout,
            })
        }
    }
}

/// Run a remote command under a hard deadline.
pub async fn run_with_timeout(
    session: &mut dyn RemoteSession,
    command: &str,
    timeout: Duration,
    what: &str,
) -> Result<CommandOutput> {
    with_deadline(session.run(command, timeout), timeout, what).await
}
