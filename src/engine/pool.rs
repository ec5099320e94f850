// src/engine/pool.rs

//! Bounded worker pool.
//!
//! One short-lived Tokio task per machine, at most `width` of them running
//! at once. A permit is taken *before* a worker is spawned, so the dispatch
//! loop itself is the bounded queue. [`WorkerPool::run`] only returns after
//! every worker has produced its [`MachineResult`]; nothing downstream (setup
//! checks, aggregation) can observe a partial set.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::engine::outcome::MachineResult;
use crate::errors::FleexError;
use crate::fleet::Machine;

/// Default width for build runs.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPool {
    limit: Option<usize>,
}

impl WorkerPool {
    /// `None` means one worker per machine.
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    /// Effective number of concurrent workers for `machines` machines.
    pub fn width(&self, machines: usize) -> usize {
        let machines = machines.max(1);
        self.limit.unwrap_or(machines).clamp(1, machines)
    }

    /// Run `job` once per machine and wait for all of them.
    ///
    /// Results come back in dispatch order, which is the order of `machines`.
    /// A worker that panics is reported as a failed result for its machine.
    pub async fn run<F, Fut>(&self, machines: Vec<(usize, Machine)>, job: F) -> Vec<MachineResult>
    where
        F: Fn(usize, Machine) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MachineResult> + Send + 'static,
    {
        let width = self.width(machines.len());
        let semaphore = Arc::new(Semaphore::new(width));
        let job = Arc::new(job);

        debug!(machines = machines.len(), width, "dispatching workers");

        let mut handles = Vec::with_capacity(machines.len());
        for (index, machine) in machines {
            let job = Arc::clone(&job);
            let label = machine.label.clone();

            // The pool never closes its semaphore; a closed one fails the
            // machine instead of running it unbounded.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(machine = %label, error = %e, "worker pool closed");
                    let mut result = MachineResult::new(index, &label);
                    result.fail(&FleexError::Other(anyhow!("worker pool closed: {e}")));
                    handles.push((index, label, tokio::spawn(async move { result })));
                    continue;
                }
            };

            let handle = tokio::spawn(async move {
                // Held until this worker is done.
                let _permit = permit;
                job(index, machine).await
            });
            handles.push((index, label, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, label, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(machine = %label, error = %e, "worker task failed");
                    let mut result = MachineResult::new(index, &label);
                    result.fail(&FleexError::Other(anyhow!("worker task failed: {e}")));
                    results.push(result);
                }
            }
        }

        results
    }
}
