#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use fleex::config::{
    BuildRecipe, BuildStep, FileTransfer, OsSection, OutputPolicy, RawBuildRecipe, RawWorkflow,
    VerifyCheck, Workflow, WorkflowStep,
};
use fleex::fleet::{Fleet, Machine};
use fleex::types::{AggregateStrategy, DurationSpec, ScaleMode};

/// `n` machines labelled `<name>-1` .. `<name>-n`, ips `10.0.0.1` ..
pub fn machines_of(name: &str, n: usize) -> Vec<Machine> {
    (1..=n)
        .map(|i| Machine::new(format!("{}", 1000 + i), format!("{name}-{i}"), format!("10.0.0.{i}")))
        .collect()
}

pub fn fleet_of(name: &str, n: usize) -> Fleet {
    Fleet::new(name, machines_of(name, n))
}

/// Builder for `Workflow` to simplify test setup.
pub struct WorkflowBuilder {
    raw: RawWorkflow,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            raw: RawWorkflow {
                name: name.to_string(),
                description: String::new(),
                author: String::new(),
                vars: BTreeMap::new(),
                files: Vec::new(),
                setup: Vec::new(),
                steps: Vec::new(),
                output: OutputPolicy::default(),
            },
        }
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.raw.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn file(mut self, source: impl Into<PathBuf>, destination: &str) -> Self {
        self.raw.files.push(FileTransfer {
            source: source.into(),
            destination: destination.to_string(),
        });
        self
    }

    pub fn setup(mut self, command: &str) -> Self {
        self.raw.setup.push(command.to_string());
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.raw.steps.push(step);
        self
    }

    pub fn aggregate(mut self, strategy: AggregateStrategy) -> Self {
        self.raw.output.aggregate = strategy;
        self
    }

    pub fn deduplicate(mut self, yes: bool) -> Self {
        self.raw.output.deduplicate = yes;
        self
    }

    pub fn raw(self) -> RawWorkflow {
        self.raw
    }

    pub fn build(self) -> Workflow {
        Workflow::try_from(self.raw).expect("Failed to build valid workflow from builder")
    }
}

/// Builder for `WorkflowStep`.
pub struct StepBuilder {
    step: WorkflowStep,
}

impl StepBuilder {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            step: WorkflowStep {
                name: name.to_string(),
                id: None,
                command: command.to_string(),
                timeout: None,
                scale_mode: None,
                split_var: None,
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.step.id = Some(id.to_string());
        self
    }

    pub fn timeout(mut self, d: std::time::Duration) -> Self {
        self.step.timeout = Some(DurationSpec(d));
        self
    }

    pub fn scale_mode(mut self, mode: ScaleMode) -> Self {
        self.step.scale_mode = Some(mode);
        self
    }

    pub fn split_var(mut self, var: &str) -> Self {
        self.step.split_var = Some(var.to_string());
        self
    }

    pub fn build(self) -> WorkflowStep {
        self.step
    }
}

/// Builder for `BuildRecipe`.
pub struct BuildRecipeBuilder {
    raw: RawBuildRecipe,
}

impl BuildRecipeBuilder {
    /// Starts with `INPUT` and `OUTPUT` set, as build runs require them.
    pub fn new(name: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("INPUT".to_string(), "/opt/in".to_string());
        vars.insert("OUTPUT".to_string(), "/opt/out".to_string());
        Self {
            raw: RawBuildRecipe {
                name: name.to_string(),
                description: String::new(),
                author: String::new(),
                version: "1.0".to_string(),
                os: OsSection::default(),
                files: Vec::new(),
                steps: Vec::new(),
                verify: Vec::new(),
                vars,
            },
        }
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.raw.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_var(mut self, key: &str) -> Self {
        self.raw.vars.remove(key);
        self
    }

    pub fn supported_os(mut self, id: &str) -> Self {
        self.raw.os.supported.push(id.to_string());
        self
    }

    pub fn file(mut self, source: impl Into<PathBuf>, destination: &str) -> Self {
        self.raw.files.push(FileTransfer {
            source: source.into(),
            destination: destination.to_string(),
        });
        self
    }

    /// A step with one attempt and no continue-on-error.
    pub fn step(self, name: &str, commands: &[&str]) -> Self {
        self.step_with(name, commands, None, false)
    }

    pub fn step_with(
        mut self,
        name: &str,
        commands: &[&str],
        retries: Option<u32>,
        continue_on: bool,
    ) -> Self {
        self.raw.steps.push(BuildStep {
            name: name.to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            retries,
            timeout: None,
            continue_on,
        });
        self
    }

    pub fn verify(mut self, name: &str, command: &str, expect: Option<&str>) -> Self {
        self.raw.verify.push(VerifyCheck {
            name: name.to_string(),
            command: command.to_string(),
            expect: expect.map(str::to_string),
            timeout: None,
        });
        self
    }

    pub fn raw(self) -> RawBuildRecipe {
        self.raw
    }

    pub fn build(self) -> BuildRecipe {
        BuildRecipe::try_from(self.raw).expect("Failed to build valid recipe from builder")
    }
}
