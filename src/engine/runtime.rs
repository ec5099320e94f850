// src/engine/runtime.rs

//! One invocation, end to end.
//!
//! Workflow: fetch fleet → partition → setup phase → worker phase → barrier
//! → aggregate → cleanup (→ teardown). Build: fetch fleet → worker phase
//! with retries and verification (→ teardown).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{BuildRecipe, RunConfig, VarMap, Workflow};
use crate::engine::aggregate::aggregate;
use crate::engine::assignment::ChunkAssignment;
use crate::engine::build::{BuildRunner, BuildSwitches};
use crate::engine::layout::RunLayout;
use crate::engine::pool::{WorkerPool, DEFAULT_BUILD_CONCURRENCY};
use crate::engine::progress::{ProgressEvent, ProgressSink};
use crate::engine::summary::RunSummary;
use crate::engine::workflow::WorkflowRunner;
use crate::errors::{ErrorKind, FleexError, Result};
use crate::fleet::{fetch_fleet, Fleet, FleetProvider};
use crate::remote::Connector;
use crate::template::Vars;
use crate::types::ScaleMode;

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn FleetProvider>,
    pub connector: Arc<dyn Connector>,
    pub progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub fleet: String,
    /// Primary input; required when any step runs horizontally.
    pub input: Option<PathBuf>,
    /// Where the aggregated output is written.
    pub output: PathBuf,
    /// Mode of the first step when it declares none.
    pub scale_mode: ScaleMode,
    /// Overrides for the workflow's `vars`.
    pub vars: VarMap,
    pub delete_after: bool,
    pub dry_run: bool,
}

impl WorkflowOptions {
    pub fn new(fleet: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            fleet: fleet.into(),
            input: None,
            output: output.into(),
            scale_mode: ScaleMode::default(),
            vars: VarMap::new(),
            delete_after: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub fleet: String,
    /// Overrides for the recipe's `vars`.
    pub vars: VarMap,
    pub switches: BuildSwitches,
    /// Pool width; falls back to the run config, then to 5.
    pub concurrency: Option<usize>,
    pub delete_after: bool,
    pub dry_run: bool,
}

/// Fan a workflow out over a fleet and aggregate the results.
///
/// When no machine produced output the summary comes back with
/// `no_output` set and nothing is written to `opts.output`.
pub async fn run_workflow(
    workflow: Workflow,
    opts: &WorkflowOptions,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    let outcome = workflow_inner(workflow, opts, config, collab).await;
    if opts.delete_after && !opts.dry_run {
        teardown(collab.provider.as_ref(), &opts.fleet).await;
    }
    outcome
}

/// The single-command fan-out: a one-step workflow with no chaining.
pub async fn run_scan(
    command: &str,
    opts: &WorkflowOptions,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    run_workflow(Workflow::single_step("scan", command), opts, config, collab).await
}

async fn workflow_inner(
    workflow: Workflow,
    opts: &WorkflowOptions,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    let fleet = fetch_fleet(collab.provider.as_ref(), &opts.fleet).await?;
    info!(
        workflow = %workflow.name,
        fleet = %fleet.name,
        machines = fleet.len(),
        timestamp = config.timestamp,
        "starting workflow run"
    );

    let mut vars = Vars::from_map(&workflow.vars);
    vars.extend(&opts.vars);

    let layout = RunLayout::new(&config.tmp_root, config.timestamp);
    layout.create()?;
    let keep_temp = config.keep_temp;

    let outcome = workflow_phases(workflow, opts, vars, &fleet, layout.clone(), config, collab).await;

    if keep_temp {
        info!(root = %layout.root().display(), "keeping run directory");
    } else {
        layout.cleanup();
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn workflow_phases(
    workflow: Workflow,
    opts: &WorkflowOptions,
    vars: Vars,
    fleet: &Fleet,
    layout: RunLayout,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    let assignment = ChunkAssignment::prepare(
        &workflow,
        opts.scale_mode,
        opts.input.as_deref(),
        &vars,
        fleet,
        &layout,
    )?;

    let policy = workflow.output;
    let has_setup = !workflow.files.is_empty() || !workflow.setup.is_empty();
    let pool = WorkerPool::new(config.concurrency);
    let runner = Arc::new(WorkflowRunner::new(
        Arc::new(workflow),
        vars,
        opts.scale_mode,
        Arc::new(assignment),
        layout.clone(),
        Arc::new(config),
        Arc::clone(&collab.connector),
        Arc::clone(&collab.progress),
    ));

    if opts.dry_run {
        print_workflow_plan(&runner, fleet);
        return Ok(RunSummary {
            total: fleet.len(),
            ..RunSummary::default()
        });
    }

    if has_setup {
        let r = Arc::clone(&runner);
        let results = pool
            .run(fleet.indexed(), move |i, m| {
                let r = Arc::clone(&r);
                async move { r.setup(i, m).await }
            })
            .await;

        for result in results.iter().filter(|r| r.failed()) {
            if result.error_kind == Some(ErrorKind::Connect) {
                warn!(machine = %result.label, "unreachable during setup");
                continue;
            }
            return Err(FleexError::SetupFailure {
                machine: result.label.clone(),
                message: result.error.clone().unwrap_or_default(),
            });
        }
        info!(machines = results.len(), "setup complete");
    }

    let r = Arc::clone(&runner);
    let results = pool
        .run(fleet.indexed(), move |i, m| {
            let r = Arc::clone(&r);
            async move { r.run(i, m).await }
        })
        .await;

    let mut summary = RunSummary::from_results(results);
    info!(
        succeeded = summary.succeeded,
        total = summary.total,
        skipped = summary.skipped,
        "worker phase complete"
    );

    let files: Vec<PathBuf> = summary
        .results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.output_file.clone())
        .collect();

    match aggregate(&files, policy, &opts.output) {
        Ok(lines) => {
            collab.progress.emit(ProgressEvent::Aggregated {
                path: opts.output.clone(),
                lines,
            });
            summary.output = Some(opts.output.clone());
        }
        Err(FleexError::NoOutputFiles) => {
            warn!(
                succeeded = summary.succeeded,
                total = summary.total,
                "no machine produced output"
            );
            summary.no_output = true;
        }
        Err(e) => return Err(e),
    }
    Ok(summary)
}

fn print_workflow_plan(runner: &WorkflowRunner, fleet: &Fleet) {
    println!("fleex dry-run: {} machines", fleet.len());
    for (index, machine) in fleet.machines().iter().enumerate() {
        println!();
        println!("[{}] {} ({})", index, machine.label, machine.ip);
        for (step, command) in runner.plan(index, machine) {
            println!("  - {step}");
            println!("      {command}");
        }
    }
    debug!("dry-run complete (no remote calls)");
}

/// Run a build recipe on every machine of a fleet.
pub async fn run_build(
    recipe: BuildRecipe,
    opts: &BuildOptions,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    let outcome = build_inner(recipe, opts, config, collab).await;
    if opts.delete_after && !opts.dry_run {
        teardown(collab.provider.as_ref(), &opts.fleet).await;
    }
    outcome
}

async fn build_inner(
    recipe: BuildRecipe,
    opts: &BuildOptions,
    config: RunConfig,
    collab: &Collaborators,
) -> Result<RunSummary> {
    let mut vars = Vars::from_map(&recipe.vars);
    vars.extend(&opts.vars);

    let width = opts
        .concurrency
        .or(config.concurrency)
        .unwrap_or(DEFAULT_BUILD_CONCURRENCY);
    let recipe_name = recipe.name.clone();

    let runner = Arc::new(BuildRunner::new(
        Arc::new(recipe),
        vars,
        opts.switches,
        Arc::new(config),
        Arc::clone(&collab.connector),
        Arc::clone(&collab.progress),
    )?);

    if opts.dry_run {
        print_build_plan(&runner, &recipe_name, opts.switches.verify);
        return Ok(RunSummary::default());
    }

    let fleet = fetch_fleet(collab.provider.as_ref(), &opts.fleet).await?;
    info!(
        recipe = %recipe_name,
        fleet = %fleet.name,
        machines = fleet.len(),
        width,
        "starting build run"
    );

    let r = Arc::clone(&runner);
    let results = WorkerPool::new(Some(width))
        .run(fleet.indexed(), move |i, m| {
            let r = Arc::clone(&r);
            async move { r.run(i, m).await }
        })
        .await;

    let summary = RunSummary::from_results(results);
    info!(
        succeeded = summary.succeeded,
        total = summary.total,
        "build complete"
    );
    Ok(summary)
}

fn print_build_plan(runner: &BuildRunner, name: &str, verify: bool) {
    println!("fleex dry-run: recipe {name}");
    for (step, commands) in runner.plan() {
        println!("  - {step}");
        for command in commands {
            println!("      {command}");
        }
    }
    if verify {
        for (check, command) in runner.plan_verify() {
            println!("  verify {check}");
            println!("      {command}");
        }
    }
    debug!("dry-run complete (no remote calls)");
}

/// Delete a fleet through the provider. Failures are logged only.
pub async fn teardown(provider: &dyn FleetProvider, fleet: &str) {
    info!(%fleet, "deleting fleet");
    if let Err(e) = provider.delete_fleet(fleet).await {
        warn!(%fleet, error = %e, "fleet teardown failed");
    }
}
