// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fleet;
pub mod logging;
pub mod partition;
pub mod remote;
pub mod template;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, FanOutArgs};
use crate::config::{
    default_config_path, load_operator_config, load_recipe, load_workflow, FleexConfig, RunConfig,
    VarMap,
};
use crate::engine::{
    run_build, run_scan, run_workflow, teardown, BuildOptions, BuildSwitches, Collaborators,
    RunSummary, TracingProgress, WorkflowOptions,
};
use crate::fleet::StaticInventory;
use crate::remote::SshConnector;
use crate::types::ScaleMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - operator config loading (`Fleex.toml`)
/// - the static inventory and SSH transport
/// - the engine entry point for the chosen subcommand
/// - Ctrl-C handling
///
/// Returns whether every machine succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let (config_path, explicit) = match args.config {
        Some(ref p) => (p.clone(), true),
        None => (default_config_path(), false),
    };
    let operator = load_operator_config(&config_path, explicit)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let collab = collaborators(&operator);
    let mut run_config = RunConfig::from_operator_config(&operator);

    match args.command {
        Command::Workflow(wf) => {
            let workflow = load_workflow(&wf.file)
                .with_context(|| format!("loading workflow {}", wf.file.display()))?;
            run_config.keep_temp |= wf.common.keep_temp;
            let opts = fan_out_options(&wf.common, wf.scale_mode);
            let verbose = wf.common.verbose;
            let summary = with_interrupt(
                &collab,
                &opts.fleet,
                opts.delete_after,
                run_workflow(workflow, &opts, run_config, &collab),
            )
            .await?;
            Ok(report(summary, verbose, opts.dry_run))
        }
        Command::Scan(scan) => {
            run_config.keep_temp |= scan.common.keep_temp;
            let opts = fan_out_options(&scan.common, ScaleMode::Horizontal);
            let verbose = scan.common.verbose;
            let summary = with_interrupt(
                &collab,
                &opts.fleet,
                opts.delete_after,
                run_scan(&scan.command, &opts, run_config, &collab),
            )
            .await?;
            Ok(report(summary, verbose, opts.dry_run))
        }
        Command::Build(build) => {
            let recipe = load_recipe(&build.recipe)
                .with_context(|| format!("loading recipe {}", build.recipe.display()))?;
            let opts = BuildOptions {
                fleet: build.fleet.clone(),
                vars: to_var_map(&build.vars),
                switches: BuildSwitches {
                    continue_on_error: build.continue_on_error,
                    verify: !build.no_verify,
                },
                concurrency: build.concurrency,
                delete_after: build.delete_after,
                dry_run: build.dry_run,
            };
            let summary = with_interrupt(
                &collab,
                &opts.fleet,
                opts.delete_after,
                run_build(recipe, &opts, run_config, &collab),
            )
            .await?;
            Ok(report(summary, build.verbose, opts.dry_run))
        }
    }
}

fn collaborators(operator: &FleexConfig) -> Collaborators {
    Collaborators {
        provider: Arc::new(StaticInventory::new(operator.machine.clone())),
        connector: Arc::new(SshConnector::new()),
        progress: Arc::new(TracingProgress),
    }
}

fn fan_out_options(args: &FanOutArgs, scale_mode: ScaleMode) -> WorkflowOptions {
    WorkflowOptions {
        fleet: args.fleet.clone(),
        input: args.input.clone(),
        output: args.output.clone(),
        scale_mode,
        vars: to_var_map(&args.vars),
        delete_after: args.delete_after,
        dry_run: args.dry_run,
    }
}

fn to_var_map(pairs: &[(String, String)]) -> VarMap {
    pairs.iter().cloned().collect()
}

/// Race the run against Ctrl-C. On interrupt the fleet is torn down when
/// `delete_after` was requested; in-flight remote commands are abandoned.
async fn with_interrupt<F>(
    collab: &Collaborators,
    fleet: &str,
    delete_after: bool,
    run: F,
) -> Result<RunSummary>
where
    F: Future<Output = crate::errors::Result<RunSummary>>,
{
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        res = run => Ok(res?),
        _ = interrupt => {
            info!("interrupted");
            if delete_after {
                teardown(collab.provider.as_ref(), fleet).await;
            }
            anyhow::bail!("interrupted")
        }
    }
}

fn report(summary: RunSummary, verbose: bool, dry_run: bool) -> bool {
    if dry_run {
        return true;
    }
    summary.print_report(verbose);
    summary.all_succeeded()
}
