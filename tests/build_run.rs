// tests/build_run.rs

mod common;
use crate::common::{collaborators, run_config};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use fleex::engine::{run_build, BuildOptions, BuildSwitches};
use fleex::errors::{ErrorKind, FleexError};
use fleex_test_utils::builders::BuildRecipeBuilder;
use fleex_test_utils::fake_remote::{FakeConnector, Reply};
use fleex_test_utils::{init_tracing, with_timeout};

fn options() -> BuildOptions {
    BuildOptions {
        fleet: "node".to_string(),
        ..BuildOptions::default()
    }
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    init_tracing();
    let dir = tempdir().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let recipe = BuildRecipeBuilder::new("flaky")
        .step_with("install", &["apt-get install -y tool"], Some(3), false)
        .build();

    let seen = Arc::clone(&attempts);
    let remote = FakeConnector::new().with_handler(move |_, cmd, _| {
        if !cmd.starts_with("apt-get") {
            return None;
        }
        let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
        Some(if n < 3 {
            Reply::exit(100, "could not get lock")
        } else {
            Reply::ok("installed")
        })
    });
    let collab = collaborators("node", 1, &remote);

    let summary = with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    let result = &summary.results[0];
    assert!(result.success);
    assert_eq!(result.steps.len(), 1);
    assert!(result.steps[0].success);
    assert_eq!(result.steps[0].retries, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_machine() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("broken")
        .step_with("install", &["false"], Some(2), false)
        .step("never", &["echo unreachable"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);

    let summary = with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    let result = &summary.results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Step));
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].retries, 1);
    assert_eq!(remote.commands("node-1"), vec!["false", "false"]);
}

#[tokio::test]
async fn test_first_failing_command_aborts_the_attempt() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("abort")
        .step("multi", &["echo one", "false", "echo three"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);

    with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(remote.commands("node-1"), vec!["echo one", "false"]);
}

#[tokio::test]
async fn test_continue_on_error_runs_later_steps() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("lenient")
        .step_with("optional", &["exit 2"], None, true)
        .step("required", &["echo ok"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 2, &remote);

    let summary = with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    for result in summary.results.iter() {
        assert!(result.success, "{} should succeed", result.label);
        assert_eq!(result.steps.len(), 2);
        assert!(!result.steps[0].success);
        assert!(result.steps[1].success);
    }
}

#[tokio::test]
async fn test_failure_without_continue_halts_only_that_machine() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("strict")
        .step("compile", &["make"])
        .step("install", &["make install"])
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, _| {
        (label == "node-2" && cmd == "make").then(|| Reply::exit(2, "error: missing header"))
    });
    let collab = collaborators("node", 3, &remote);

    let summary = with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed), (2, 1));
    assert_eq!(remote.commands("node-2"), vec!["make"]);
    assert_eq!(remote.commands("node-3"), vec!["make", "make install"]);
}

#[tokio::test]
async fn test_global_continue_on_error_switch() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("strict")
        .step("compile", &["false"])
        .step("install", &["echo installed"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);
    let opts = BuildOptions {
        switches: BuildSwitches {
            continue_on_error: true,
            verify: true,
        },
        ..options()
    };

    let summary = with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert!(summary.results[0].success);
    assert_eq!(remote.commands("node-1"), vec!["false", "echo installed"]);
}

#[tokio::test]
async fn test_verify_failure_fails_machine_after_successful_steps() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("verified")
        .step("install", &["echo done"])
        .verify("version", "tool --version", Some("v3"))
        .verify("exists", "which tool", None)
        .build();

    let remote = FakeConnector::new().with_handler(|_, cmd, _| {
        (cmd == "tool --version").then(|| Reply::ok("tool v2.9.1"))
    });
    let collab = collaborators("node", 1, &remote);

    let summary = with_timeout(run_build(recipe.clone(), &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    let result = &summary.results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Verify));
    // Both checks ran even though the first failed.
    assert_eq!(result.steps.len(), 3);
    assert!(result.steps[0].success);
    assert!(!result.steps[1].success);
    assert!(result.steps[2].success);

    // Disabled verification leaves the machine successful.
    let opts = BuildOptions {
        switches: BuildSwitches {
            continue_on_error: false,
            verify: false,
        },
        ..options()
    };
    let summary = with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();
    assert!(summary.results[0].success);
}

#[tokio::test]
async fn test_missing_input_output_vars_abort_before_dispatch() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("novars")
        .without_var("OUTPUT")
        .step("install", &["echo {INPUT}"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 2, &remote);

    match run_build(recipe, &options(), run_config(dir.path()), &collab).await {
        Err(FleexError::MissingRequiredVar(name)) => assert_eq!(name, "OUTPUT"),
        other => panic!("Expected MissingRequiredVar, got: {:?}", other),
    }
    assert!(remote.touched().is_empty());
}

#[tokio::test]
async fn test_caller_vars_override_recipe_vars_in_commands() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("vars")
        .var("VERSION", "1.0")
        .step("fetch", &["curl -o {OUTPUT} https://example.test/tool-{VERSION}.tgz"])
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);
    let mut opts = options();
    opts.vars.insert("VERSION".to_string(), "2.0".to_string());

    with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(
        remote.commands("node-1"),
        vec!["curl -o /opt/out https://example.test/tool-2.0.tgz"]
    );
}

#[tokio::test]
async fn test_unsupported_os_fails_before_steps() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("os")
        .supported_os("ubuntu")
        .step("install", &["apt-get install -y tool"])
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, _| {
        cmd.contains("/etc/os-release").then(|| {
            Reply::ok(if label == "node-1" { "ubuntu\n" } else { "alpine\n" })
        })
    });
    let collab = collaborators("node", 2, &remote);

    let summary = with_timeout(run_build(recipe, &options(), run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert!(summary.results[0].success);
    assert!(!summary.results[1].success);
    assert!(summary.results[1].error.as_deref().unwrap().contains("alpine"));
    assert_eq!(remote.commands("node-2").len(), 1);
}

#[tokio::test]
async fn test_build_pool_is_bounded_by_concurrency() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("slow")
        .step("work", &["echo working"])
        .build();

    let remote = FakeConnector::new().with_delay(Duration::from_millis(30));
    let collab = collaborators("node", 6, &remote);
    let opts = BuildOptions {
        concurrency: Some(2),
        ..options()
    };

    let summary = with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 6);
    assert!(remote.peak_sessions() <= 2);
    assert!(remote.peak_sessions() >= 1);
}

#[tokio::test]
async fn test_dry_run_contacts_neither_provider_nor_machines() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("plan")
        .step("install", &["cp {INPUT} {OUTPUT}"])
        .verify("exists", "test -f {OUTPUT}", None)
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 2, &remote);
    // No machine matches this fleet, so fetching it would fail with NoFleet.
    let opts = BuildOptions {
        fleet: "ghost".to_string(),
        dry_run: true,
        ..BuildOptions::default()
    };

    let summary = with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
    assert!(summary.results.is_empty());
    assert!(remote.touched().is_empty());
}

#[tokio::test]
async fn test_disabled_verification_issues_no_check_commands() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("unverified")
        .step("install", &["echo done"])
        .verify("version", "tool --version", Some("v3"))
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);
    let opts = BuildOptions {
        switches: BuildSwitches {
            continue_on_error: false,
            verify: false,
        },
        ..options()
    };

    let summary = with_timeout(run_build(recipe, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert!(summary.results[0].success);
    assert_eq!(summary.results[0].steps.len(), 1);
    assert_eq!(remote.commands("node-1"), vec!["echo done"]);
}

#[tokio::test]
async fn test_no_backoff_after_the_last_attempt() {
    init_tracing();
    let dir = tempdir().unwrap();

    let recipe = BuildRecipeBuilder::new("backoff")
        .step_with("install", &["false"], Some(2), false)
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("node", 1, &remote);
    let mut config = run_config(dir.path());
    config.retry_backoff = Duration::from_millis(1000);

    let started = Instant::now();
    let summary = with_timeout(run_build(recipe, &options(), config, &collab))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(!summary.results[0].success);
    assert_eq!(remote.commands("node-1"), vec!["false", "false"]);
    // One backoff between the two attempts, none after the second.
    assert!(elapsed >= Duration::from_millis(1000), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "took {elapsed:?}");
}
