// tests/workflow_run.rs

mod common;
use crate::common::{collaborators, remote_root, run_config, write_lines, TS};

use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use fleex::engine::{run_scan, run_workflow, WorkflowOptions};
use fleex::errors::{ErrorKind, FleexError};
use fleex::types::{AggregateStrategy, ScaleMode};
use fleex_test_utils::builders::{StepBuilder, WorkflowBuilder};
use fleex_test_utils::fake_remote::{Call, FakeConnector, Reply};
use fleex_test_utils::{init_tracing, with_timeout};

fn options(dir: &std::path::Path, input: Option<std::path::PathBuf>) -> WorkflowOptions {
    let mut opts = WorkflowOptions::new("web", dir.join("final.txt"));
    opts.input = input;
    opts
}

#[tokio::test]
async fn test_horizontal_run_splits_input_and_aggregates() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "hosts.txt", &["e", "b", "d", "a", "c"]);

    let wf = WorkflowBuilder::new("copy")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .aggregate(AggregateStrategy::SortUnique)
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.total), (2, 2));
    assert_eq!(summary.output.as_deref(), Some(opts.output.as_path()));
    assert_eq!(fs::read_to_string(&opts.output).unwrap(), "a\nb\nc\nd\ne\n");

    // Chunk 0 (3 lines) went to web-1, chunk 1 (2 lines) to web-2.
    let root = remote_root("web-1");
    let sent: Vec<_> = remote
        .calls("web-1")
        .into_iter()
        .filter_map(|c| match c {
            Call::Send { local, remote } => Some((local, remote)),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.ends_with("input/chunk-web-0"));
    assert_eq!(sent[0].1, format!("{root}/input"));

    // Remote namespace is removed at the end.
    assert!(remote.commands("web-1").last().unwrap().starts_with("rm -rf"));
    assert_eq!(remote.calls("web-1").last(), Some(&Call::Close));

    // Local run directory is removed unless asked to keep it.
    assert!(!dir.path().join(format!("fleex-workflow-{TS}")).exists());
}

#[tokio::test]
async fn test_step_output_chaining_uses_literal_remote_paths() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["x"]);

    let wf = WorkflowBuilder::new("chain")
        .step(StepBuilder::new("a", "cat {INPUT} > {OUTPUT}").id("a").build())
        .step(StepBuilder::new("b", "cat {a.OUTPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("web", 1, &remote);
    let opts = options(dir.path(), Some(input));

    with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    let commands = remote.commands("web-1");
    assert!(commands.contains(&format!(
        "cat /tmp/fleex-{TS}-web-1/step-0.out > /tmp/fleex-{TS}-web-1/step-1.out"
    )));
    assert!(commands.contains(&format!(
        "cat /tmp/fleex-{TS}-web-1/input > /tmp/fleex-{TS}-web-1/step-0.out"
    )));

    // The last step's output is the one retrieved.
    assert!(remote.calls("web-1").iter().any(|c| matches!(
        c,
        Call::Receive { remote, .. } if remote == &format!("{}/step-1.out", remote_root("web-1"))
    )));
}

#[tokio::test]
async fn test_failing_step_halts_only_that_machine() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2", "3"]);

    let wf = WorkflowBuilder::new("two")
        .step(StepBuilder::new("first", "probe {INPUT} > {OUTPUT}").build())
        .step(StepBuilder::new("second", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, fs| {
        let (_, dst) = cmd.strip_prefix("probe ")?.split_once(" > ")?;
        if label == "web-2" {
            return Some(Reply::exit(3, "probe crashed"));
        }
        fs.insert(dst.to_string(), format!("{label}\n"));
        Some(Reply::ok(""))
    });
    let collab = collaborators("web", 3, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed, summary.total), (2, 1, 3));

    let failed = &summary.results[1];
    assert_eq!(failed.label, "web-2");
    assert_eq!(failed.error_kind, Some(ErrorKind::Step));
    assert_eq!(failed.steps.len(), 1);
    assert!(failed.steps[0].output.contains("probe crashed"));
    assert!(!remote.commands("web-2").iter().any(|c| c.starts_with("cat ")));
    assert!(remote.commands("web-2").last().unwrap().starts_with("rm -rf"));

    assert_eq!(fs::read_to_string(&opts.output).unwrap(), "web-1\nweb-3\n");
}

#[tokio::test]
async fn test_zero_successes_still_report_every_machine() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2"]);

    let wf = WorkflowBuilder::new("fail")
        .step(StepBuilder::new("boom", "false").build())
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert!(summary.no_output);
    assert_eq!((summary.succeeded, summary.total, summary.failed), (0, 2, 2));
    assert!(summary.output.is_none());
    assert!(!summary.all_succeeded());
    for result in summary.results.iter() {
        assert_eq!(result.error_kind, Some(ErrorKind::Step));
    }

    let report = summary.report(false);
    assert!(report.starts_with("0/2 machines succeeded"));
    assert!(report.contains("no output files to aggregate"));

    assert!(!opts.output.exists());
    assert_eq!(remote.touched(), vec!["web-1", "web-2"]);
}

#[tokio::test]
async fn test_unreachable_machine_does_not_stop_others() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2"]);

    let wf = WorkflowBuilder::new("copy")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new().unreachable(&["web-1"]);
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.results[0].error_kind, Some(ErrorKind::Connect));
    assert!(summary.results[0].steps.is_empty());
    assert_eq!(fs::read_to_string(&opts.output).unwrap(), "2\n");
}

#[tokio::test]
async fn test_machines_without_a_chunk_are_skipped() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["only"]);

    let wf = WorkflowBuilder::new("copy")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("web", 3, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 2, 0));
    assert!(summary.results[1].skipped && summary.results[1].error.is_none());
    assert_eq!(remote.touched(), vec!["web-1"]);
}

#[tokio::test]
async fn test_vertical_split_var_is_partitioned_and_input_shared() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "targets.txt", &["t1", "t2"]);
    let words = write_lines(dir.path(), "words.txt", &["w1", "w2", "w3", "w4"]);

    let wf = WorkflowBuilder::new("brute")
        .var("WORDS", words.to_str().unwrap())
        .step(
            StepBuilder::new("brute", "brute -w {WORDS} -i {INPUT} -o {OUTPUT}")
                .scale_mode(ScaleMode::Vertical)
                .split_var("WORDS")
                .build(),
        )
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, fs| {
        let out = cmd.strip_prefix("brute ")?.rsplit_once(" -o ")?.1;
        fs.insert(out.to_string(), format!("{label}\n"));
        Some(Reply::ok(""))
    });
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);

    let root = remote_root("web-2");
    assert_eq!(
        remote.commands("web-2")[1],
        format!("brute -w {root}/split-WORDS -i {root}/input -o {root}/step-0.out")
    );

    let sends: Vec<_> = remote
        .calls("web-2")
        .into_iter()
        .filter_map(|c| match c {
            Call::Send { local, .. } => Some(local),
            _ => None,
        })
        .collect();
    assert_eq!(sends.len(), 2);
    assert!(sends[0].ends_with("targets.txt"));
    assert!(sends[1].ends_with("chunk-web-WORDS-1"));
}

#[tokio::test]
async fn test_failing_setup_aborts_before_worker_phase() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2"]);

    let wf = WorkflowBuilder::new("setup")
        .setup("which httpx")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, _| {
        (cmd == "which httpx" && label == "web-2").then(|| Reply::exit(1, "not found"))
    });
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    match with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab)).await {
        Err(FleexError::SetupFailure { machine, message }) => {
            assert_eq!(machine, "web-2");
            assert!(message.contains("which httpx"));
        }
        other => panic!("Expected SetupFailure, got: {:?}", other),
    }
    assert!(!remote.commands("web-1").iter().any(|c| c.starts_with("cat ")));
    assert!(!opts.output.exists());
}

#[tokio::test]
async fn test_setup_skips_machines_without_a_chunk() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["only"]);

    let wf = WorkflowBuilder::new("setup")
        .setup("which tool")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    // Would abort the run if web-3 were set up at all.
    let remote = FakeConnector::new().with_handler(|label, cmd, _| {
        (cmd == "which tool" && label == "web-3").then(|| Reply::exit(1, "not found"))
    });
    let collab = collaborators("web", 3, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(remote.touched(), vec!["web-1"]);
    assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 2, 0));
    assert_eq!(fs::read_to_string(&opts.output).unwrap(), "only\n");
}

#[tokio::test]
async fn test_step_timeout_is_enforced() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1"]);

    let wf = WorkflowBuilder::new("slow")
        .step(
            StepBuilder::new("slow", "sleep-forever {INPUT}")
                .timeout(Duration::from_millis(100))
                .build(),
        )
        .build();

    let remote = FakeConnector::new()
        .with_handler(|_, cmd, _| cmd.starts_with("sleep-forever").then_some(Reply::Hang));
    let collab = collaborators("web", 1, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();
    assert!(summary.no_output);
    assert_eq!(summary.results[0].error_kind, Some(ErrorKind::Timeout));

    // The hung command was cancelled and cleanup still ran.
    assert!(remote.commands("web-1").last().unwrap().starts_with("rm -rf"));
}

#[tokio::test]
async fn test_step_timeout_is_recorded_on_the_step() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2"]);

    let wf = WorkflowBuilder::new("slow")
        .step(
            StepBuilder::new("maybe-slow", "work {INPUT} > {OUTPUT}")
                .timeout(Duration::from_millis(100))
                .build(),
        )
        .build();

    let remote = FakeConnector::new().with_handler(|label, cmd, fs| {
        let (_, dst) = cmd.strip_prefix("work ")?.split_once(" > ")?;
        if label == "web-1" {
            return Some(Reply::Hang);
        }
        fs.insert(dst.to_string(), "done\n".to_string());
        Some(Reply::ok(""))
    });
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    let slow = &summary.results[0];
    assert!(!slow.success);
    assert_eq!(slow.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(slow.steps[0].error_kind, Some(ErrorKind::Timeout));
    assert!(summary.results[1].success);
}

#[tokio::test]
async fn test_dry_run_makes_no_remote_calls() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["1", "2"]);

    let wf = WorkflowBuilder::new("copy")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("web", 2, &remote);
    let mut opts = options(dir.path(), Some(input));
    opts.dry_run = true;

    let summary = with_timeout(run_workflow(wf, &opts, run_config(dir.path()), &collab))
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert!(summary.results.is_empty());
    assert!(remote.touched().is_empty());
    assert!(!opts.output.exists());
}

#[tokio::test]
async fn test_scan_is_a_single_step_workflow() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = write_lines(dir.path(), "in.txt", &["b", "a", "b"]);

    let remote = FakeConnector::new();
    let collab = collaborators("web", 2, &remote);
    let opts = options(dir.path(), Some(input));

    let summary = with_timeout(run_scan(
        "cat {INPUT} > {OUTPUT}",
        &opts,
        run_config(dir.path()),
        &collab,
    ))
    .await
    .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(fs::read_to_string(&opts.output).unwrap(), "b\na\nb\n");
}

#[tokio::test]
async fn test_missing_fleet_and_missing_input_fail_before_dispatch() {
    init_tracing();
    let dir = tempdir().unwrap();
    let wf = WorkflowBuilder::new("copy")
        .step(StepBuilder::new("copy", "cat {INPUT} > {OUTPUT}").build())
        .build();

    let remote = FakeConnector::new();
    let collab = collaborators("db", 2, &remote);

    let opts = options(dir.path(), Some(dir.path().join("nope.txt")));
    let res = run_workflow(wf.clone(), &opts, run_config(dir.path()), &collab).await;
    assert!(matches!(res, Err(FleexError::NoFleet(ref name)) if name == "web"));

    let mut opts = options(dir.path(), None);
    opts.fleet = "db".to_string();
    let res = run_workflow(wf, &opts, run_config(dir.path()), &collab).await;
    assert!(matches!(res, Err(FleexError::ConfigError(_))));

    assert!(remote.touched().is_empty());
}
