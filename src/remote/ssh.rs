// src/remote/ssh.rs

//! Remote sessions over the system `ssh` / `scp` binaries.
//!
//! All invocations of one session share an OpenSSH control master
//! (`ControlMaster=auto`), so a session costs one TCP/auth handshake no
//! matter how many commands it runs. The control socket is keyed by the
//! run's session tag and the machine label, so closing one run's session
//! never tears down another run's master to the same host. Password auth
//! goes through `sshpass -e`; keys through `-i`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SshCredentials;
use crate::errors::{FleexError, Result};
use crate::fleet::Machine;
use crate::remote::{CommandOutput, Connector, RemoteSession};
use crate::types::BoxFuture;

/// Grace period between `timeout`'s TERM and KILL on the remote side.
const REMOTE_KILL_GRACE_SECS: u64 = 5;

/// Exit code OpenSSH uses for its own (transport) errors.
const SSH_TRANSPORT_ERROR: i32 = 255;

/// Slack allowed between the local clock and the remote `timeout`.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

static TRANSPORT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(ssh:|ssh_exchange_identification|kex_exchange_identification|mux_client|control socket|connection (closed|reset|refused|timed out)|could not resolve hostname|host key verification failed|permission denied \(|broken pipe|packet_write)",
    )
    .expect("transport error pattern is valid")
});

/// Connector for real machines.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SshConnector {
    fn connect<'a>(
        &'a self,
        machine: &'a Machine,
        creds: &'a SshCredentials,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteSession>>> {
        Box::pin(async move {
            let mut session = SshSession::new(machine, creds);
            session.probe().await?;
            info!(machine = %machine.label, ip = %machine.ip, "ssh session established");
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        })
    }
}

#[derive(Debug, Clone)]
pub struct SshSession {
    label: String,
    host: String,
    creds: SshCredentials,
    control_path: PathBuf,
}

impl SshSession {
    pub fn new(machine: &Machine, creds: &SshCredentials) -> Self {
        Self {
            label: machine.label.clone(),
            host: machine.ip.clone(),
            creds: creds.clone(),
            control_path: control_path(&std::env::temp_dir(), &creds.session_tag, &machine.label),
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn target(&self) -> String {
        format!("{}@{}", self.creds.user, self.host)
    }

    /// `-o` options shared by ssh and scp.
    fn common_options(&self) -> Vec<String> {
        let mut opts = vec![
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.creds.connect_timeout.as_secs().max(1)),
            "ControlMaster=auto".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "ControlPersist=60".to_string(),
        ];
        if self.creds.password.is_none() {
            opts.push("BatchMode=yes".to_string());
        }
        opts.into_iter()
            .flat_map(|o| ["-o".to_string(), o])
            .collect()
    }

    /// Start `program` (ssh or scp), wrapped in sshpass when a password is set.
    fn base_command(&self, program: &str, port_flag: &str) -> Command {
        let mut cmd = match self.creds.password {
            Some(ref password) => {
                let mut c = Command::new("sshpass");
                c.arg("-e").arg(program).env("SSHPASS", password);
                c
            }
            None => Command::new(program),
        };
        cmd.arg(port_flag).arg(self.creds.port.to_string());
        cmd.args(self.common_options());
        if let Some(ref key) = self.creds.key {
            cmd.arg("-i").arg(key);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn probe(&mut self) -> Result<()> {
        let mut cmd = self.base_command("ssh", "-p");
        cmd.arg(self.target()).arg("true");

        let deadline = self.creds.connect_timeout * 2;
        let output = tokio::time::timeout(deadline, cmd.output())
            .await
            .map_err(|_| FleexError::ConnectFailure {
                machine: self.label.clone(),
                message: format!("no answer within {deadline:?}"),
            })?
            .map_err(|e| FleexError::ConnectFailure {
                machine: self.label.clone(),
                message: format!("spawning ssh: {e}"),
            })?;

        if !output.status.success() {
            return Err(FleexError::ConnectFailure {
                machine: self.label.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn scp(&self, from: String, to: String) -> Result<()> {
        let mut cmd = self.base_command("scp", "-P");
        cmd.arg("-q").arg(&from).arg(&to);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("spawning scp for {}", self.label))?;

        if !output.status.success() {
            return Err(FleexError::TransferFailure {
                machine: self.label.clone(),
                message: format!(
                    "{} -> {}: {}",
                    from,
                    to,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        debug!(machine = %self.label, %from, %to, "file transferred");
        Ok(())
    }
}

impl RemoteSession for SshSession {
    fn run<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput>> {
        Box::pin(async move {
            let secs = ceil_secs(timeout);
            let remote = format!(
                "timeout -k {} {} sh -c {}",
                REMOTE_KILL_GRACE_SECS,
                secs,
                shell_quote(command)
            );

            let mut cmd = self.base_command("ssh", "-p");
            cmd.arg(self.target()).arg(&remote);

            debug!(machine = %self.label, %command, "running remote command");
            let started = Instant::now();
            let output = cmd
                .output()
                .await
                .with_context(|| format!("spawning ssh for {}", self.label))?;

            let result = CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            classify_exit(&self.label, command, timeout, started.elapsed(), result)
        })
    }

    fn send_file<'a>(&'a mut self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let to = format!("{}:{}", self.target(), remote);
            self.scp(local.display().to_string(), to).await
        })
    }

    fn receive_file<'a>(
        &'a mut self,
        remote: &'a str,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let from = format!("{}:{}", self.target(), remote);
            self.scp(from, local.display().to_string()).await
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut cmd = self.base_command("ssh", "-p");
            cmd.arg("-O").arg("exit").arg(self.target());
            match cmd.output().await {
                Ok(out) if out.status.success() => {
                    debug!(machine = %self.label, "control master closed");
                }
                Ok(out) => {
                    warn!(
                        machine = %self.label,
                        stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                        "closing control master failed"
                    );
                }
                Err(e) => warn!(machine = %self.label, error = %e, "closing control master failed"),
            }
            Ok(())
        })
    }
}

/// `<dir>/fleex-cm-<tag>-<label>-%C`; ssh expands `%C` to a hash of host,
/// port and user.
pub fn control_path(dir: &Path, session_tag: &str, label: &str) -> PathBuf {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let name = if session_tag.is_empty() {
        format!("fleex-cm-{label}-%C")
    } else {
        format!("fleex-cm-{session_tag}-{label}-%C")
    };
    dir.join(name)
}

/// Map a finished remote command to its outcome.
///
/// The command's own exit code wins unless there is evidence otherwise:
/// 124/137 mean `timeout(1)` fired only once `elapsed` has reached the
/// deadline, and 255 is a transport error only when stderr says so.
pub fn classify_exit(
    label: &str,
    command: &str,
    timeout: Duration,
    elapsed: Duration,
    output: CommandOutput,
) -> Result<CommandOutput> {
    match output.exit_code {
        Some(124) | Some(137) if elapsed + DEADLINE_SLACK >= timeout => {
            Err(FleexError::TimeoutFailure {
                what: command.to_string(),
                after: timeout,
            })
        }
        Some(SSH_TRANSPORT_ERROR) if is_transport_error(&output.stderr) => {
            Err(FleexError::ConnectFailure {
                machine: label.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
        _ => Ok(output),
    }
}

fn is_transport_error(stderr: &str) -> bool {
    stderr.lines().any(|line| TRANSPORT_ERROR.is_match(line.trim()))
}

fn ceil_secs(d: Duration) -> u64 {
    (d.as_secs() + u64::from(d.subsec_nanos() > 0)).max(1)
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
