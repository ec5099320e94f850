// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Run-level variants (`EmptyInput`, `NoFleet`, `MissingRequiredVar`,
//! `SetupFailure`, `NoOutputFiles`) abort a whole invocation. Per-machine
//! variants (`ConnectFailure`, `TransferFailure`, `StepFailure`,
//! `VerifyFailure`, `TimeoutFailure`) are recorded inside that machine's
//! result and never stop sibling machines.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleexError {
    #[error("input has no non-empty lines: {0}")]
    EmptyInput(String),

    #[error("no machines found in fleet '{0}'")]
    NoFleet(String),

    #[error("required variable '{0}' is not defined")]
    MissingRequiredVar(String),

    #[error("setup failed on {machine}: {message}")]
    SetupFailure { machine: String, message: String },

    #[error("connection to {machine} failed: {message}")]
    ConnectFailure { machine: String, message: String },

    #[error("file transfer failed on {machine}: {message}")]
    TransferFailure { machine: String, message: String },

    #[error("step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },

    #[error("verification '{name}' failed: {message}")]
    VerifyFailure { name: String, message: String },

    #[error("'{what}' timed out after {after:?}")]
    TimeoutFailure { what: String, after: Duration },

    #[error("no output files to aggregate")]
    NoOutputFiles,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Copyable classification of a [`FleexError`], stored in per-machine results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyInput,
    NoFleet,
    MissingRequiredVar,
    Setup,
    Connect,
    Transfer,
    Step,
    Verify,
    Timeout,
    NoOutputFiles,
    Config,
    Unsupported,
    Io,
    Other,
}

impl FleexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleexError::EmptyInput(_) => ErrorKind::EmptyInput,
            FleexError::NoFleet(_) => ErrorKind::NoFleet,
            FleexError::MissingRequiredVar(_) => ErrorKind::MissingRequiredVar,
            FleexError::SetupFailure { .. } => ErrorKind::Setup,
            FleexError::ConnectFailure { .. } => ErrorKind::Connect,
            FleexError::TransferFailure { .. } => ErrorKind::Transfer,
            FleexError::StepFailure { .. } => ErrorKind::Step,
            FleexError::VerifyFailure { .. } => ErrorKind::Verify,
            FleexError::TimeoutFailure { .. } => ErrorKind::Timeout,
            FleexError::NoOutputFiles => ErrorKind::NoOutputFiles,
            FleexError::ConfigError(_) | FleexError::TomlError(_) | FleexError::YamlError(_) => {
                ErrorKind::Config
            }
            FleexError::Unsupported(_) => ErrorKind::Unsupported,
            FleexError::IoError(_) => ErrorKind::Io,
            FleexError::Other(_) => ErrorKind::Other,
        }
    }

    /// True for errors that belong to a single machine rather than the run.
    pub fn is_per_machine(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connect
                | ErrorKind::Transfer
                | ErrorKind::Step
                | ErrorKind::Verify
                | ErrorKind::Timeout
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleexError>;
