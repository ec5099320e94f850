// src/engine/build.rs

//! Build pipelines: bounded retries per step, then verification.
//!
//! Per machine: connect, OS gate, file transfer, steps, verify, close.
//! A step attempt runs its commands in order and the first failing command
//! ends the attempt. Between failed attempts the runner sleeps for the
//! configured backoff; there is no sleep after the last attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{BuildRecipe, BuildStep, RunConfig, VerifyCheck};
use crate::engine::outcome::{MachineResult, StepResult};
use crate::engine::progress::{ProgressEvent, ProgressSink};
use crate::engine::{connect_error, transfer_error};
use crate::errors::{FleexError, Result};
use crate::fleet::Machine;
use crate::remote::{run_with_timeout, with_deadline, Connector, RemoteSession};
use crate::template::{expand, Vars};

const OS_RELEASE_COMMAND: &str = ". /etc/os-release && echo \"$ID\"";
const OS_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller switches for a build run.
#[derive(Debug, Clone, Copy)]
pub struct BuildSwitches {
    /// Proceed past any failed step, as if every step had `continue_on`.
    pub continue_on_error: bool,
    /// Run the recipe's `verify` checks after the steps.
    pub verify: bool,
}

impl Default for BuildSwitches {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            verify: true,
        }
    }
}

pub struct BuildRunner {
    recipe: Arc<BuildRecipe>,
    vars: Vars,
    switches: BuildSwitches,
    config: Arc<RunConfig>,
    connector: Arc<dyn Connector>,
    progress: Arc<dyn ProgressSink>,
}

impl BuildRunner {
    /// Fails with `MissingRequiredVar` unless `INPUT` and `OUTPUT` are set.
    pub fn new(
        recipe: Arc<BuildRecipe>,
        vars: Vars,
        switches: BuildSwitches,
        config: Arc<RunConfig>,
        connector: Arc<dyn Connector>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        vars.require(&["INPUT", "OUTPUT"])?;
        Ok(Self {
            recipe,
            vars,
            switches,
            config,
            connector,
            progress,
        })
    }

    /// Expanded commands per step, for dry runs.
    pub fn plan(&self) -> Vec<(String, Vec<String>)> {
        self.recipe
            .steps
            .iter()
            .map(|step| {
                let commands = step.commands.iter().map(|c| expand(c, &self.vars)).collect();
                (step.name.clone(), commands)
            })
            .collect()
    }

    /// Expanded verify commands, for dry runs.
    pub fn plan_verify(&self) -> Vec<(String, String)> {
        self.recipe
            .verify
            .iter()
            .map(|check| (check.name.clone(), expand(&check.command, &self.vars)))
            .collect()
    }

    pub async fn run(&self, index: usize, machine: Machine) -> MachineResult {
        let started = Instant::now();
        let label = machine.label.clone();
        self.progress.emit(ProgressEvent::MachineStarted {
            label: label.clone(),
        });
        let mut result = MachineResult::new(index, &label);

        match self.connector.connect(&machine, &self.config.ssh).await {
            Ok(mut session) => {
                match self.drive(&label, session.as_mut(), &mut result).await {
                    Ok(()) => result.success = true,
                    Err(e) => {
                        warn!(machine = %label, error = %e, "build failed");
                        result.fail(&e);
                    }
                }
                if let Err(e) = session.close().await {
                    warn!(machine = %label, error = %e, "closing session failed");
                }
            }
            Err(e) => {
                let err = connect_error(&label, e);
                warn!(machine = %label, error = %err, "connection failed; machine skipped");
                result.fail(&err);
            }
        }

        result.duration = started.elapsed();
        self.progress.emit(ProgressEvent::MachineFinished {
            label,
            success: result.success,
            skipped: false,
        });
        result
    }

    async fn drive(
        &self,
        label: &str,
        session: &mut dyn RemoteSession,
        result: &mut MachineResult,
    ) -> Result<()> {
        if !self.recipe.os.supported.is_empty() {
            self.check_os(label, session).await?;
        }

        for file in self.recipe.files.iter() {
            let dest = expand(&file.destination, &self.vars);
            with_deadline(
                session.send_file(&file.source, &dest),
                self.config.default_timeout,
                "send recipe file",
            )
            .await
            .map_err(|e| transfer_error(label, e))?;
            debug!(machine = %label, source = %file.source.display(), %dest, "file sent");
        }

        for step in self.recipe.steps.iter() {
            self.progress.emit(ProgressEvent::StepStarted {
                label: label.to_string(),
                step: step.name.clone(),
            });
            let (step_result, failure) = self.run_step(label, session, step).await;
            self.progress.emit(ProgressEvent::StepFinished {
                label: label.to_string(),
                step: step.name.clone(),
                success: step_result.success,
            });
            result.steps.push(step_result);

            if let Some(err) = failure {
                if step.continue_on || self.switches.continue_on_error {
                    warn!(machine = %label, step = %step.name, error = %err, "step failed; continuing");
                    continue;
                }
                return Err(err);
            }
        }

        if self.switches.verify {
            let mut first_failure = None;
            for check in self.recipe.verify.iter() {
                let (step_result, failure) = self.run_check(session, check).await;
                result.steps.push(step_result);
                if first_failure.is_none() {
                    first_failure = failure;
                }
            }
            if let Some(err) = first_failure {
                return Err(err);
            }
        }

        Ok(())
    }

    async fn check_os(&self, label: &str, session: &mut dyn RemoteSession) -> Result<()> {
        let out = run_with_timeout(session, OS_RELEASE_COMMAND, OS_CHECK_TIMEOUT, "os-check").await?;
        let id = out.stdout.trim();
        if !out.success() || !self.recipe.os.supported.iter().any(|s| s == id) {
            return Err(FleexError::StepFailure {
                step: "os-check".to_string(),
                message: format!(
                    "{label} runs '{id}', recipe supports {:?}",
                    self.recipe.os.supported
                ),
            });
        }
        debug!(machine = %label, os = %id, "os supported");
        Ok(())
    }

    /// Up to `step.attempts()` attempts; the error is `Some` when all failed.
    async fn run_step(
        &self,
        label: &str,
        session: &mut dyn RemoteSession,
        step: &BuildStep,
    ) -> (StepResult, Option<FleexError>) {
        let started = Instant::now();
        let attempts = step.attempts();
        let timeout = step
            .timeout
            .map(|t| t.as_duration())
            .unwrap_or(self.config.default_timeout);

        let mut attempt = 1;
        loop {
            let mut output = String::new();
            match self.attempt(session, step, timeout, &mut output).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(machine = %label, step = %step.name, attempt, "step succeeded after retry");
                    }
                    let res = StepResult::succeeded(&step.name, output, attempt - 1, started.elapsed());
                    return (res, None);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        machine = %label,
                        step = %step.name,
                        attempt,
                        attempts,
                        error = %err,
                        "attempt failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    let res = StepResult::failed(&step.name, output, attempt - 1, started.elapsed(), &err);
                    return (res, Some(err));
                }
            }
        }
    }

    async fn attempt(
        &self,
        session: &mut dyn RemoteSession,
        step: &BuildStep,
        timeout: Duration,
        output: &mut String,
    ) -> Result<()> {
        for raw in step.commands.iter() {
            let command = expand(raw, &self.vars);
            let out = run_with_timeout(session, &command, timeout, &step.name).await?;
            output.push_str(&out.combined());
            if !out.success() {
                return Err(FleexError::StepFailure {
                    step: step.name.clone(),
                    message: format!("`{command}` exited with code {:?}", out.exit_code),
                });
            }
        }
        Ok(())
    }

    async fn run_check(
        &self,
        session: &mut dyn RemoteSession,
        check: &VerifyCheck,
    ) -> (StepResult, Option<FleexError>) {
        let started = Instant::now();
        let name = format!("verify: {}", check.name);
        let command = expand(&check.command, &self.vars);
        let timeout = check
            .timeout
            .map(|t| t.as_duration())
            .unwrap_or(self.config.default_timeout);

        match run_with_timeout(session, &command, timeout, &name).await {
            Ok(out) => {
                let output = out.combined();
                let failure = if !out.success() {
                    Some(format!("exit code {:?}", out.exit_code))
                } else {
                    match check.expect.as_deref() {
                        Some(expect) if !output.contains(expect) => {
                            Some(format!("output does not contain '{expect}'"))
                        }
                        _ => None,
                    }
                };
                match failure {
                    None => (StepResult::succeeded(&name, output, 0, started.elapsed()), None),
                    Some(message) => {
                        let err = FleexError::VerifyFailure {
                            name: check.name.clone(),
                            message,
                        };
                        let res = StepResult::failed(&name, output, 0, started.elapsed(), &err);
                        (res, Some(err))
                    }
                }
            }
            Err(err) => {
                let res = StepResult::failed(&name, String::new(), 0, started.elapsed(), &err);
                (res, Some(err))
            }
        }
    }
}
