// src/config/mod.rs

//! Pipeline files and operator configuration.
//!
//! - `model.rs`: serde data model for workflows, build recipes and `Fleex.toml`.
//! - `loader.rs`: read YAML/TOML from disk.
//! - `validate.rs`: structural checks applied when turning raw files into
//!   checked [`Workflow`] / [`BuildRecipe`] values.
//! - `run.rs`: the run-scoped [`RunConfig`] threaded through the engine.

pub mod loader;
pub mod model;
pub mod run;
pub mod validate;

pub use loader::{
    default_config_path, load_operator_config, load_recipe, load_recipe_from_path,
    load_workflow, load_workflow_from_path,
};
pub use model::{
    BuildRecipe, BuildStep, ConfigSection, FileTransfer, FleexConfig, OsSection, OutputPolicy,
    RawBuildRecipe, RawWorkflow, SshSection, VarMap, VerifyCheck, Workflow, WorkflowStep,
};
pub use run::{RunConfig, SshCredentials};
pub use validate::{validate_recipe, validate_workflow};
