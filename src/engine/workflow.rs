// src/engine/workflow.rs

//! Per-machine workflow pipeline.
//!
//! ```text
//! Connecting -> FileTransfer -> StepLoop -> OutputRetrieval -> Cleanup -> Done | Failed
//! ```
//!
//! A failure after `Connecting` stops this machine's pipeline and is
//! recorded in its result together with the step results collected so far.
//! Cleanup runs regardless and never changes the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{RunConfig, Workflow, WorkflowStep};
use crate::engine::assignment::ChunkAssignment;
use crate::engine::layout::{RemoteLayout, RunLayout};
use crate::engine::outcome::{MachineResult, StepResult};
use crate::engine::progress::{ProgressEvent, ProgressSink};
use crate::engine::{connect_error, transfer_error};
use crate::errors::{FleexError, Result};
use crate::fleet::Machine;
use crate::remote::ssh::shell_quote;
use crate::remote::{run_with_timeout, with_deadline, Connector, RemoteSession};
use crate::template::{expand, Vars};
use crate::types::ScaleMode;

/// Upper bound for housekeeping commands (`mkdir`, `rm`).
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(60);

/// A step's own mode, else the run's mode for the first step, else `Local`.
pub fn effective_scale_mode(index: usize, step: &WorkflowStep, run_mode: ScaleMode) -> ScaleMode {
    step.scale_mode
        .unwrap_or(if index == 0 { run_mode } else { ScaleMode::Local })
}

/// Per-machine, per-run state threaded through the step loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Remote path the next step reads as `INPUT`.
    pub input: Option<String>,
    /// Remote path of this machine's own input chunk, if it has one.
    pub chunk: Option<String>,
    /// Step id → remote output path.
    pub outputs: BTreeMap<String, String>,
    /// Split-variable name → remote chunk path.
    pub splits: BTreeMap<String, String>,
}

impl ExecutionContext {
    fn advance(&mut self, step: &WorkflowStep, output: String) {
        if let Some(ref id) = step.id {
            self.outputs.insert(id.clone(), output.clone());
        }
        self.input = Some(output);
    }
}

/// Runs one workflow on one machine at a time; shared by all workers.
pub struct WorkflowRunner {
    workflow: Arc<Workflow>,
    base_vars: Vars,
    run_mode: ScaleMode,
    assignment: Arc<ChunkAssignment>,
    layout: RunLayout,
    config: Arc<RunConfig>,
    connector: Arc<dyn Connector>,
    progress: Arc<dyn ProgressSink>,
}

impl WorkflowRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: Arc<Workflow>,
        base_vars: Vars,
        run_mode: ScaleMode,
        assignment: Arc<ChunkAssignment>,
        layout: RunLayout,
        config: Arc<RunConfig>,
        connector: Arc<dyn Connector>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            workflow,
            base_vars,
            run_mode,
            assignment,
            layout,
            config,
            connector,
            progress,
        }
    }

    pub fn remote_layout(&self, label: &str) -> RemoteLayout {
        RemoteLayout::new(&self.config.remote_tmp_root, self.config.timestamp, label)
    }

    /// Context as it stands after `FileTransfer` for machine `index`.
    pub fn initial_context(&self, index: usize, remote: &RemoteLayout) -> ExecutionContext {
        let mut ctx = ExecutionContext::default();
        if self.assignment.input_chunk(index).is_some() || self.assignment.shared_input().is_some() {
            ctx.input = Some(remote.input());
        }
        if self.assignment.input_chunk(index).is_some() {
            ctx.chunk = Some(remote.input());
        }
        for var in self.assignment.split_vars() {
            if self.assignment.split_chunk(var, index).is_some() {
                ctx.splits.insert(var.to_string(), remote.split_chunk(var));
            }
        }
        ctx
    }

    /// Variable table for step `index`, and that step's fresh output path.
    pub fn step_vars(
        &self,
        index: usize,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
        remote: &RemoteLayout,
    ) -> (Vars, String) {
        let mode = effective_scale_mode(index, step, self.run_mode);
        let mut vars = self.base_vars.clone();

        if mode == ScaleMode::Vertical
            && let Some(var) = step.split_var.as_ref()
            && let Some(path) = ctx.splits.get(var)
        {
            vars.set(var.clone(), path.clone());
        }

        let input = match mode {
            ScaleMode::Horizontal => ctx.chunk.as_ref().or(ctx.input.as_ref()),
            ScaleMode::Vertical | ScaleMode::Local => ctx.input.as_ref(),
        };
        if let Some(input) = input {
            vars.set("INPUT", input.clone());
        }

        let output = remote.step_output(index);
        vars.set("OUTPUT", output.clone());

        for (id, path) in ctx.outputs.iter() {
            vars.set_output(id.clone(), path.clone());
        }

        (vars, output)
    }

    /// Every expanded command machine `index` would run, with no remote calls.
    pub fn plan(&self, index: usize, machine: &Machine) -> Vec<(String, String)> {
        let remote = self.remote_layout(&machine.label);
        let mut ctx = self.initial_context(index, &remote);
        let mut planned = Vec::with_capacity(self.workflow.steps.len());
        for (i, step) in self.workflow.steps.iter().enumerate() {
            let (vars, output) = self.step_vars(i, step, &ctx, &remote);
            planned.push((step.name.clone(), expand(&step.command, &vars)));
            ctx.advance(step, output);
        }
        planned
    }

    /// Full pipeline for one machine. Always returns a result.
    pub async fn run(&self, index: usize, machine: Machine) -> MachineResult {
        let started = Instant::now();
        let label = machine.label.clone();

        if !self.assignment.has_work(index) {
            info!(machine = %label, index, "no chunk assigned; skipping machine");
            self.progress.emit(ProgressEvent::MachineFinished {
                label: label.clone(),
                success: false,
                skipped: true,
            });
            return MachineResult::skipped(index, &label);
        }

        self.progress.emit(ProgressEvent::MachineStarted {
            label: label.clone(),
        });
        let mut result = MachineResult::new(index, &label);

        let mut session = match self.connector.connect(&machine, &self.config.ssh).await {
            Ok(session) => session,
            Err(e) => {
                let err = connect_error(&label, e);
                warn!(machine = %label, error = %err, "connection failed; machine skipped");
                result.fail(&err);
                return self.finish(result, started);
            }
        };

        let remote = self.remote_layout(&label);
        match self
            .drive(index, &label, session.as_mut(), &remote, &mut result)
            .await
        {
            Ok(()) => result.success = true,
            Err(e) => {
                warn!(machine = %label, error = %e, "pipeline failed");
                result.fail(&e);
            }
        }

        cleanup_remote(session.as_mut(), &label, remote.root()).await;
        self.finish(result, started)
    }

    fn finish(&self, mut result: MachineResult, started: Instant) -> MachineResult {
        result.duration = started.elapsed();
        self.progress.emit(ProgressEvent::MachineFinished {
            label: result.label.clone(),
            success: result.success,
            skipped: result.skipped,
        });
        result
    }

    async fn drive(
        &self,
        index: usize,
        label: &str,
        session: &mut dyn RemoteSession,
        remote: &RemoteLayout,
        result: &mut MachineResult,
    ) -> Result<()> {
        // FileTransfer
        make_remote_dir(session, label, remote.root()).await?;

        let ctx_paths = self.initial_context(index, remote);
        let input_source = self
            .assignment
            .input_chunk(index)
            .or(self.assignment.shared_input());
        if let (Some(local), Some(dest)) = (input_source, ctx_paths.input.as_ref()) {
            with_deadline(session.send_file(local, dest), self.config.default_timeout, "send input")
                .await
                .map_err(|e| transfer_error(label, e))?;
            debug!(machine = %label, local = %local.display(), remote = %dest, "input sent");
        }
        for (var, dest) in ctx_paths.splits.iter() {
            if let Some(local) = self.assignment.split_chunk(var, index) {
                with_deadline(session.send_file(local, dest), self.config.default_timeout, "send split chunk")
                    .await
                    .map_err(|e| transfer_error(label, e))?;
                debug!(machine = %label, %var, remote = %dest, "split chunk sent");
            }
        }

        // StepLoop
        let mut ctx = ctx_paths;
        for (i, step) in self.workflow.steps.iter().enumerate() {
            let (vars, output) = self.step_vars(i, step, &ctx, remote);
            let command = expand(&step.command, &vars);
            let timeout = step
                .timeout
                .map(|t| t.as_duration())
                .unwrap_or(self.config.default_timeout);

            self.progress.emit(ProgressEvent::StepStarted {
                label: label.to_string(),
                step: step.name.clone(),
            });
            debug!(machine = %label, step = %step.name, %command, "running step");

            let t0 = Instant::now();
            let (step_result, failure) =
                match run_with_timeout(session, &command, timeout, &step.name).await {
                    Ok(out) if out.success() => (
                        StepResult::succeeded(&step.name, out.combined(), 0, t0.elapsed()),
                        None,
                    ),
                    Ok(out) => {
                        let err = FleexError::StepFailure {
                            step: step.name.clone(),
                            message: format!("exit code {:?}", out.exit_code),
                        };
                        let res = StepResult::failed(&step.name, out.combined(), 0, t0.elapsed(), &err);
                        (res, Some(err))
                    }
                    Err(err) => {
                        let res = StepResult::failed(&step.name, String::new(), 0, t0.elapsed(), &err);
                        (res, Some(err))
                    }
                };

            self.progress.emit(ProgressEvent::StepFinished {
                label: label.to_string(),
                step: step.name.clone(),
                success: step_result.success,
            });
            result.steps.push(step_result);

            if let Some(err) = failure {
                return Err(err);
            }

            ctx.advance(step, output);
        }

        // OutputRetrieval
        if let Some(last) = ctx.input.as_ref() {
            let local = self.layout.output_file(label);
            with_deadline(
                session.receive_file(last, &local),
                self.config.default_timeout,
                "receive output",
            )
            .await
            .map_err(|e| transfer_error(label, e))?;
            info!(machine = %label, remote = %last, local = %local.display(), "output retrieved");
            result.output_file = Some(local);
        }

        Ok(())
    }

    /// Send workflow files and run setup commands on one machine.
    ///
    /// The result carries the underlying failure kind. The caller decides
    /// which kinds abort the run; an unreachable machine fails again,
    /// per-machine, in the worker phase. A machine with no chunk is skipped
    /// here too and is never contacted.
    pub async fn setup(&self, index: usize, machine: Machine) -> MachineResult {
        let started = Instant::now();
        let label = machine.label.clone();
        if !self.assignment.has_work(index) {
            debug!(machine = %label, "no chunk, skipping setup");
            return MachineResult::skipped(index, &label);
        }
        let mut result = MachineResult::new(index, &label);

        let mut session = match self.connector.connect(&machine, &self.config.ssh).await {
            Ok(session) => session,
            Err(e) => {
                result.fail(&connect_error(&label, e));
                result.duration = started.elapsed();
                return result;
            }
        };

        match self.setup_inner(&label, session.as_mut(), &mut result).await {
            Ok(()) => result.success = true,
            Err(e) => result.fail(&e),
        }

        if let Err(e) = session.close().await {
            warn!(machine = %label, error = %e, "closing session failed");
        }
        result.duration = started.elapsed();
        result
    }

    async fn setup_inner(
        &self,
        label: &str,
        session: &mut dyn RemoteSession,
        result: &mut MachineResult,
    ) -> Result<()> {
        for file in self.workflow.files.iter() {
            let dest = expand(&file.destination, &self.base_vars);
            with_deadline(
                session.send_file(&file.source, &dest),
                self.config.default_timeout,
                "send workflow file",
            )
            .await
            .map_err(|e| transfer_error(label, e))?;
            debug!(machine = %label, source = %file.source.display(), %dest, "workflow file sent");
        }

        for (i, raw) in self.workflow.setup.iter().enumerate() {
            let command = expand(raw, &self.base_vars);
            let name = format!("setup[{i}]");
            let t0 = Instant::now();
            let out = run_with_timeout(session, &command, self.config.default_timeout, &name).await?;

            if !out.success() {
                let err = FleexError::StepFailure {
                    step: name.clone(),
                    message: format!("`{command}` exited with code {:?}", out.exit_code),
                };
                result
                    .steps
                    .push(StepResult::failed(&name, out.combined(), 0, t0.elapsed(), &err));
                return Err(err);
            }
            result
                .steps
                .push(StepResult::succeeded(&name, out.combined(), 0, t0.elapsed()));
        }

        Ok(())
    }
}

async fn make_remote_dir(session: &mut dyn RemoteSession, label: &str, dir: &str) -> Result<()> {
    let command = format!("mkdir -p {}", shell_quote(dir));
    let out = run_with_timeout(session, &command, HOUSEKEEPING_TIMEOUT, "mkdir")
        .await
        .map_err(|e| transfer_error(label, e))?;
    if !out.success() {
        return Err(FleexError::TransferFailure {
            machine: label.to_string(),
            message: format!("creating {dir}: {}", out.combined().trim()),
        });
    }
    Ok(())
}

/// Best-effort removal of the remote namespace, then close the session.
async fn cleanup_remote(session: &mut dyn RemoteSession, label: &str, dir: &str) {
    let command = format!("rm -rf {}", shell_quote(dir));
    match run_with_timeout(session, &command, HOUSEKEEPING_TIMEOUT, "cleanup").await {
        Ok(out) if out.success() => debug!(machine = %label, %dir, "remote namespace removed"),
        Ok(out) => warn!(machine = %label, %dir, output = %out.combined(), "remote cleanup failed"),
        Err(e) => warn!(machine = %label, %dir, error = %e, "remote cleanup failed"),
    }
    if let Err(e) = session.close().await {
        warn!(machine = %label, error = %e, "closing session failed");
    }
}
