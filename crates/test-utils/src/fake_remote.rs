//! Scripted in-memory remote for engine tests.
//!
//! Each machine gets its own in-memory file system. Commands are answered by
//! an optional test-supplied handler first, then by a tiny built-in shell
//! that understands just enough to move data around:
//!
//! - `mkdir -p DIR`, `rm -rf DIR`, `true`, `false`, `exit N`
//! - `cp SRC DST`, `cat SRC > DST`, `sort -u SRC > DST`, `echo TEXT > DST`
//!
//! Anything else succeeds with empty output. Every call is recorded per
//! machine label.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleex::config::SshCredentials;
use fleex::errors::{FleexError, Result};
use fleex::fleet::Machine;
use fleex::remote::{CommandOutput, Connector, RemoteSession};
use fleex::types::BoxFuture;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run(String),
    Send { local: String, remote: String },
    Receive { remote: String, local: String },
    Close,
}

/// How a scripted command answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    /// Never completes; only a deadline ends it.
    Hang,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Output(CommandOutput::ok(stdout))
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Reply::Output(CommandOutput::failed(code, stderr))
    }
}

/// Remote file system of one machine: path → contents.
pub type RemoteFs = BTreeMap<String, String>;

/// `(label, command, fs)` → `Some(reply)`, or `None` for the built-in shell.
pub type Handler = dyn Fn(&str, &str, &mut RemoteFs) -> Option<Reply> + Send + Sync;

#[derive(Default)]
struct State {
    calls: BTreeMap<String, Vec<Call>>,
    fs: BTreeMap<String, RemoteFs>,
}

/// Connector whose sessions talk to in-memory machines.
#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
    handler: Option<Arc<Handler>>,
    unreachable: Arc<HashSet<String>>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            handler: None,
            unreachable: Arc::new(HashSet::new()),
            delay: Duration::ZERO,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str, &mut RemoteFs) -> Option<Reply> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Connections to these labels fail.
    pub fn unreachable(mut self, labels: &[&str]) -> Self {
        self.unreachable = Arc::new(labels.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Sleep this long inside every `run`, to make overlap observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pre-seed a remote file.
    pub fn put_file(&self, label: &str, path: &str, contents: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .fs
            .entry(label.to_string())
            .or_default()
            .insert(path.to_string(), contents.to_string());
    }

    pub fn file(&self, label: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.fs.get(label).and_then(|fs| fs.get(path).cloned())
    }

    pub fn files(&self, label: &str) -> RemoteFs {
        let state = self.state.lock().unwrap();
        state.fs.get(label).cloned().unwrap_or_default()
    }

    pub fn calls(&self, label: &str) -> Vec<Call> {
        let state = self.state.lock().unwrap();
        state.calls.get(label).cloned().unwrap_or_default()
    }

    /// Commands run on `label`, in order.
    pub fn commands(&self, label: &str) -> Vec<String> {
        self.calls(label)
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Labels that saw at least one call.
    pub fn touched(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.calls.keys().cloned().collect()
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, label: &str, call: Call) {
        let mut state = self.state.lock().unwrap();
        state.calls.entry(label.to_string()).or_default().push(call);
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        machine: &'a Machine,
        _creds: &'a SshCredentials,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteSession>>> {
        Box::pin(async move {
            if self.unreachable.contains(&machine.label) {
                return Err(FleexError::ConnectFailure {
                    machine: machine.label.clone(),
                    message: "connection refused".to_string(),
                });
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                label: machine.label.clone(),
                remote: self.clone(),
                open: true,
            }) as Box<dyn RemoteSession>)
        })
    }
}

pub struct FakeSession {
    label: String,
    remote: FakeConnector,
    open: bool,
}

impl RemoteSession for FakeSession {
    fn run<'a>(
        &'a mut self,
        command: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput>> {
        Box::pin(async move {
            self.remote.record(&self.label, Call::Run(command.to_string()));
            if !self.remote.delay.is_zero() {
                tokio::time::sleep(self.remote.delay).await;
            }

            let reply = {
                let mut state = self.remote.state.lock().unwrap();
                let fs = state.fs.entry(self.label.clone()).or_default();
                let scripted = match self.remote.handler {
                    Some(ref h) => h(&self.label, command, fs),
                    None => None,
                };
                match scripted {
                    Some(reply) => reply,
                    None => builtin(command, fs),
                }
            };

            match reply {
                Reply::Output(out) => Ok(out),
                Reply::Hang => std::future::pending::<Result<CommandOutput>>().await,
            }
        })
    }

    fn send_file<'a>(&'a mut self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.remote.record(
                &self.label,
                Call::Send {
                    local: local.display().to_string(),
                    remote: remote.to_string(),
                },
            );
            let contents = fs::read_to_string(local)?;
            self.remote.put_file(&self.label, remote, &contents);
            Ok(())
        })
    }

    fn receive_file<'a>(
        &'a mut self,
        remote: &'a str,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.remote.record(
                &self.label,
                Call::Receive {
                    remote: remote.to_string(),
                    local: local.display().to_string(),
                },
            );
            match self.remote.file(&self.label, remote) {
                Some(contents) => {
                    fs::write(local, contents)?;
                    Ok(())
                }
                None => Err(FleexError::TransferFailure {
                    machine: self.label.clone(),
                    message: format!("{remote}: no such file"),
                }),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.remote.record(&self.label, Call::Close);
            if std::mem::take(&mut self.open) {
                self.remote.active.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if self.open {
            self.remote.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('\'').trim_matches('"').to_string()
}

fn lines_of(fs: &RemoteFs, path: &str) -> Option<Vec<String>> {
    fs.get(path)
        .map(|c| c.lines().map(str::to_string).collect())
}

fn write_lines(fs: &mut RemoteFs, path: &str, lines: &[String]) {
    let mut body = lines.join("\n");
    if !lines.is_empty() {
        body.push('\n');
    }
    fs.insert(path.to_string(), body);
}

fn missing(path: &str) -> Reply {
    Reply::exit(1, &format!("{path}: No such file or directory"))
}

fn builtin(command: &str, fs: &mut RemoteFs) -> Reply {
    let command = command.trim();

    if let Some((lhs, dst)) = command.split_once(" > ") {
        let dst = unquote(dst);
        let words: Vec<&str> = lhs.split_whitespace().collect();
        return match words.as_slice() {
            ["cat", src] => match lines_of(fs, &unquote(src)) {
                Some(lines) => {
                    write_lines(fs, &dst, &lines);
                    Reply::ok("")
                }
                None => missing(src),
            },
            ["sort", "-u", src] => match lines_of(fs, &unquote(src)) {
                Some(mut lines) => {
                    lines.sort();
                    lines.dedup();
                    write_lines(fs, &dst, &lines);
                    Reply::ok("")
                }
                None => missing(src),
            },
            ["echo", rest @ ..] => {
                write_lines(fs, &dst, &[unquote(&rest.join(" "))]);
                Reply::ok("")
            }
            _ => Reply::ok(""),
        };
    }

    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["true"] | ["mkdir", "-p", _] => Reply::ok(""),
        ["false"] => Reply::exit(1, ""),
        ["exit", code] => Reply::exit(code.parse().unwrap_or(1), ""),
        ["rm", "-rf", dir] => {
            let dir = unquote(dir);
            fs.retain(|path, _| !path.starts_with(&dir));
            Reply::ok("")
        }
        ["cp", src, dst] => match fs.get(&unquote(src)).cloned() {
            Some(contents) => {
                fs.insert(unquote(dst), contents);
                Reply::ok("")
            }
            None => missing(src),
        },
        _ => Reply::ok(""),
    }
}
