// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use fleex::config::{load_operator_config, load_recipe, load_workflow, RunConfig};
use fleex::errors::FleexError;
use fleex::types::{AggregateStrategy, ScaleMode};
use fleex_test_utils::builders::{BuildRecipeBuilder, StepBuilder, WorkflowBuilder};

fn temp_with(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

fn expect_config_error<T: std::fmt::Debug>(result: Result<T, FleexError>, needle: &str) {
    match result {
        Err(FleexError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message '{msg}' should mention '{needle}'")
        }
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_loads_yaml_workflow() {
    let file = temp_with(
        ".yaml",
        r#"
name: probe
vars:
  PORTS: 443
  WORDS: words.txt
setup:
  - "which httpx"
steps:
  - name: probe
    id: probe
    command: "httpx -l {INPUT} -p {PORTS} -o {OUTPUT}"
    timeout: 10m
  - name: brute
    command: "ffuf -w {WORDS} -i {probe.OUTPUT} -o {OUTPUT}"
    scale-mode: vertical
    split-var: WORDS
output:
  aggregate: sort-unique
  deduplicate: true
"#,
    );

    let wf = load_workflow(file.path()).unwrap();

    assert_eq!(wf.name, "probe");
    assert_eq!(wf.vars.get("PORTS").map(String::as_str), Some("443"));
    assert_eq!(wf.setup, vec!["which httpx"]);
    assert_eq!(wf.steps.len(), 2);
    assert_eq!(
        wf.steps[0].timeout.map(|t| t.as_duration()),
        Some(Duration::from_secs(600))
    );
    assert_eq!(wf.steps[1].scale_mode, Some(ScaleMode::Vertical));
    assert_eq!(wf.steps[1].split_var.as_deref(), Some("WORDS"));
    assert_eq!(wf.output.aggregate, AggregateStrategy::SortUnique);
    assert!(wf.output.deduplicate);
}

#[test]
fn test_loads_toml_recipe() {
    let file = temp_with(
        ".toml",
        r#"
name = "nuclei"
version = "3.1"

[os]
supported = ["ubuntu", "debian"]

[vars]
INPUT = "/opt/in"
OUTPUT = "/opt/out"

[[steps]]
name = "install"
commands = ["apt-get update", "apt-get install -y nuclei"]
retries = 3
timeout = 300
continue_on = true

[[verify]]
name = "binary"
command = "nuclei -version"
expect = "v3"
"#,
    );

    let recipe = load_recipe(file.path()).unwrap();

    assert_eq!(recipe.os.supported, vec!["ubuntu", "debian"]);
    let step = &recipe.steps[0];
    assert_eq!(step.attempts(), 3);
    assert!(step.continue_on);
    assert_eq!(step.timeout.map(|t| t.as_duration()), Some(Duration::from_secs(300)));
    assert_eq!(recipe.verify[0].expect.as_deref(), Some("v3"));
}

#[test]
fn test_workflow_without_steps_is_rejected() {
    let raw = WorkflowBuilder::new("empty").raw();
    expect_config_error(fleex::config::Workflow::try_from(raw), "at least one step");
}

#[test]
fn test_duplicate_step_ids_are_rejected() {
    let raw = WorkflowBuilder::new("dup")
        .step(StepBuilder::new("a", "true").id("x").build())
        .step(StepBuilder::new("b", "true").id("x").build())
        .raw();
    expect_config_error(fleex::config::Workflow::try_from(raw), "duplicate step id");
}

#[test]
fn test_forward_output_reference_is_rejected() {
    let raw = WorkflowBuilder::new("fwd")
        .step(StepBuilder::new("a", "cat {b.OUTPUT}").build())
        .step(StepBuilder::new("b", "true").id("b").build())
        .raw();
    expect_config_error(fleex::config::Workflow::try_from(raw), "no earlier step");
}

#[test]
fn test_vertical_step_needs_split_var() {
    let raw = WorkflowBuilder::new("v")
        .step(StepBuilder::new("a", "true").scale_mode(ScaleMode::Vertical).build())
        .raw();
    expect_config_error(fleex::config::Workflow::try_from(raw), "split-var");
}

#[test]
fn test_split_var_must_be_declared() {
    let raw = WorkflowBuilder::new("v")
        .step(
            StepBuilder::new("a", "true")
                .scale_mode(ScaleMode::Vertical)
                .split_var("WORDS")
                .build(),
        )
        .raw();
    expect_config_error(fleex::config::Workflow::try_from(raw), "WORDS");
}

#[test]
fn test_zero_retries_is_rejected() {
    let raw = BuildRecipeBuilder::new("r")
        .step_with("s", &["true"], Some(0), false)
        .raw();
    expect_config_error(fleex::config::BuildRecipe::try_from(raw), "retries");
}

#[test]
fn test_bad_duration_is_a_parse_error() {
    let file = temp_with(
        ".yaml",
        "name: x\nsteps:\n  - name: a\n    command: \"true\"\n    timeout: 5 fortnights\n",
    );
    match load_workflow(file.path()) {
        Err(FleexError::YamlError(e)) => assert!(e.to_string().contains("fortnights")),
        other => panic!("Expected YamlError, got: {:?}", other),
    }
}

#[test]
fn test_operator_config_defaults_and_overrides() {
    let missing = std::env::temp_dir().join("fleex-does-not-exist.toml");
    let defaults = load_operator_config(&missing, false).unwrap();
    assert_eq!(defaults.ssh.user, "root");
    assert_eq!(defaults.ssh.port, 22);
    assert!(defaults.machine.is_empty());
    assert!(load_operator_config(&missing, true).is_err());

    let file = temp_with(
        ".toml",
        r#"
[config]
concurrency = 3
default_timeout = "90s"
keep_temp = true

[ssh]
user = "ops"
port = 2222

[[machine]]
id = "1"
label = "scan-1"
ip = "10.1.0.1"
"#,
    );
    let cfg = load_operator_config(file.path(), true).unwrap();
    let run = RunConfig::from_operator_config(&cfg);

    assert_eq!(run.concurrency, Some(3));
    assert_eq!(run.default_timeout, Duration::from_secs(90));
    assert!(run.keep_temp);
    assert_eq!(run.ssh.user, "ops");
    assert_eq!(run.ssh.port, 2222);
    assert_eq!(run.remote_tmp_root, "/tmp");
    assert_eq!(cfg.machine[0].status, "running");
}
