// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::fleet::Machine;
use crate::types::{AggregateStrategy, DurationSpec, ScaleMode};

/// Variable table as written in pipeline files.
pub type VarMap = BTreeMap<String, String>;

/// A workflow file as read from disk, before validation.
///
/// ```yaml
/// name: subdomain-probe
/// vars:
///   PORTS: "80,443"
/// setup:
///   - "which httpx"
/// steps:
///   - name: probe
///     id: probe
///     command: "httpx -l {INPUT} -ports {PORTS} -o {OUTPUT}"
///     timeout: 10m
///   - name: filter
///     command: "grep 200 {probe.OUTPUT} > {OUTPUT}"
/// output:
///   aggregate: sort-unique
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflow {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: VarMap,

    /// Files copied to every machine before the worker phase.
    #[serde(default)]
    pub files: Vec<FileTransfer>,

    /// Commands run on every machine before the worker phase.
    #[serde(default)]
    pub setup: Vec<String>,

    #[serde(default)]
    pub steps: Vec<WorkflowStep>,

    #[serde(default)]
    pub output: OutputPolicy,
}

/// Validated workflow. Immutable once a run starts.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub author: String,
    pub vars: VarMap,
    pub files: Vec<FileTransfer>,
    pub setup: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    pub output: OutputPolicy,
}

impl Workflow {
    pub(crate) fn new_unchecked(raw: RawWorkflow) -> Self {
        Self {
            name: raw.name,
            description: raw.description,
            author: raw.author,
            vars: raw.vars,
            files: raw.files,
            setup: raw.setup,
            steps: raw.steps,
            output: raw.output,
        }
    }

    /// A one-command fan-out: no setup, no chaining, concat aggregation.
    pub fn single_step(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            author: String::new(),
            vars: VarMap::new(),
            files: Vec::new(),
            setup: Vec::new(),
            steps: vec![WorkflowStep {
                name: name.to_string(),
                id: None,
                command: command.to_string(),
                timeout: None,
                scale_mode: None,
                split_var: None,
            }],
            output: OutputPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: String,

    /// Makes `{<id>.OUTPUT}` available to later steps.
    #[serde(default)]
    pub id: Option<String>,

    pub command: String,

    #[serde(default)]
    pub timeout: Option<DurationSpec>,

    #[serde(default, rename = "scale-mode", alias = "scale_mode")]
    pub scale_mode: Option<ScaleMode>,

    /// Variable whose file is split across the fleet in vertical mode.
    #[serde(default, rename = "split-var", alias = "split_var")]
    pub split_var: Option<String>,
}

/// `output:` section of a workflow.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OutputPolicy {
    #[serde(default)]
    pub aggregate: AggregateStrategy,

    #[serde(default)]
    pub deduplicate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileTransfer {
    /// Local path.
    pub source: PathBuf,
    /// Remote path; may contain placeholders.
    pub destination: String,
}

/// A build recipe as read from disk, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildRecipe {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub os: OsSection,

    #[serde(default)]
    pub files: Vec<FileTransfer>,

    #[serde(default)]
    pub steps: Vec<BuildStep>,

    #[serde(default)]
    pub verify: Vec<VerifyCheck>,

    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: VarMap,
}

#[derive(Debug, Clone)]
pub struct BuildRecipe {
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub os: OsSection,
    pub files: Vec<FileTransfer>,
    pub steps: Vec<BuildStep>,
    pub verify: Vec<VerifyCheck>,
    pub vars: VarMap,
}

impl BuildRecipe {
    pub(crate) fn new_unchecked(raw: RawBuildRecipe) -> Self {
        Self {
            name: raw.name,
            description: raw.description,
            author: raw.author,
            version: raw.version,
            os: raw.os,
            files: raw.files,
            steps: raw.steps,
            verify: raw.verify,
            vars: raw.vars,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsSection {
    /// Accepted `/etc/os-release` IDs; empty means any.
    #[serde(default)]
    pub supported: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildStep {
    pub name: String,

    pub commands: Vec<String>,

    /// Total attempts; `None` means a single attempt.
    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub timeout: Option<DurationSpec>,

    #[serde(default, alias = "continue-on-error", alias = "continue_on_error")]
    pub continue_on: bool,
}

impl BuildStep {
    pub fn attempts(&self) -> u32 {
        self.retries.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCheck {
    pub name: String,

    pub command: String,

    /// Substring the command output must contain.
    #[serde(default)]
    pub expect: Option<String>,

    #[serde(default)]
    pub timeout: Option<DurationSpec>,
}

/// Operator configuration (`Fleex.toml`).
///
/// ```toml
/// [config]
/// concurrency = 10
/// default_timeout = "30m"
///
/// [ssh]
/// user = "root"
/// key = "~/.ssh/fleex"
///
/// [[machine]]
/// id = "1001"
/// label = "scan-1"
/// ip = "10.0.0.11"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleexConfig {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub ssh: SshSection,

    /// Static machine inventory.
    #[serde(default)]
    pub machine: Vec<Machine>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Worker-pool width. Unset means one worker per machine.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Local directory holding the per-run temp tree. Defaults to the OS temp dir.
    #[serde(default)]
    pub tmp_root: Option<PathBuf>,

    #[serde(default = "default_remote_tmp_root")]
    pub remote_tmp_root: String,

    #[serde(default = "default_timeout")]
    pub default_timeout: DurationSpec,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: DurationSpec,

    #[serde(default)]
    pub keep_temp: bool,
}

fn default_remote_tmp_root() -> String {
    "/tmp".to_string()
}

fn default_timeout() -> DurationSpec {
    DurationSpec(std::time::Duration::from_secs(30 * 60))
}

fn default_retry_backoff() -> DurationSpec {
    DurationSpec(std::time::Duration::from_secs(2))
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            tmp_root: None,
            remote_tmp_root: default_remote_tmp_root(),
            default_timeout: default_timeout(),
            retry_backoff: default_retry_backoff(),
            keep_temp: false,
        }
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub key: Option<PathBuf>,

    /// Used through `sshpass` when no key is set.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: DurationSpec,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> DurationSpec {
    DurationSpec(std::time::Duration::from_secs(10))
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            key: None,
            password: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Accept scalar variable values of any type and keep them as strings.
fn deserialize_vars<'de, D>(deserializer: D) -> Result<VarMap, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Scalar::Bool(b) => b.to_string(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Text(s) => s,
            };
            (k, v)
        })
        .collect())
}
