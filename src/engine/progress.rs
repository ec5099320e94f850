// src/engine/progress.rs

//! Lifecycle events for progress reporting.
//!
//! The engine emits events and never waits on the sink. Rendering (spinners,
//! bars, JSON) belongs to whoever implements [`ProgressSink`].

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    MachineStarted {
        label: String,
    },
    StepStarted {
        label: String,
        step: String,
    },
    StepFinished {
        label: String,
        step: String,
        success: bool,
    },
    MachineFinished {
        label: String,
        success: bool,
        skipped: bool,
    },
    Aggregated {
        path: PathBuf,
        lines: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Default sink: turns events into `tracing` records.
#[derive(Debug, Clone, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::MachineStarted { label } => {
                debug!(machine = %label, "machine started");
            }
            ProgressEvent::StepStarted { label, step } => {
                debug!(machine = %label, %step, "step started");
            }
            ProgressEvent::StepFinished {
                label,
                step,
                success,
            } => {
                if success {
                    debug!(machine = %label, %step, "step finished");
                } else {
                    warn!(machine = %label, %step, "step failed");
                }
            }
            ProgressEvent::MachineFinished {
                label,
                success,
                skipped,
            } => {
                info!(machine = %label, success, skipped, "machine finished");
            }
            ProgressEvent::Aggregated { path, lines } => {
                info!(path = %path.display(), lines, "results aggregated");
            }
        }
    }
}

/// Forwards events into a channel, e.g. for a UI task.
///
/// Uses `try_send`: when the consumer lags, events are dropped rather than
/// stalling workers.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "progress event dropped");
        }
    }
}
