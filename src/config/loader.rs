// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::model::{BuildRecipe, FleexConfig, RawBuildRecipe, RawWorkflow, Workflow};
use crate::errors::{FleexError, Result};

/// Deserialise a YAML (`.yaml`/`.yml`) or TOML (`.toml`) file.
///
/// Anything else is tried as YAML.
fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    debug!(path = %path.display(), ?ext, "parsing pipeline file");

    match ext.as_deref() {
        Some("toml") => Ok(toml::from_str(&contents)?),
        _ => Ok(serde_yaml::from_str(&contents)?),
    }
}

/// Load a workflow without semantic validation.
pub fn load_workflow_from_path(path: impl AsRef<Path>) -> Result<RawWorkflow> {
    parse_file(path.as_ref())
}

/// Load and validate a workflow. This is what the rest of the crate uses.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let raw = load_workflow_from_path(path)?;
    Workflow::try_from(raw)
}

pub fn load_recipe_from_path(path: impl AsRef<Path>) -> Result<RawBuildRecipe> {
    parse_file(path.as_ref())
}

/// Load and validate a build recipe.
pub fn load_recipe(path: impl AsRef<Path>) -> Result<BuildRecipe> {
    let raw = load_recipe_from_path(path)?;
    BuildRecipe::try_from(raw)
}

/// Load the operator config. A missing file at the default location yields
/// defaults; a missing file that was asked for explicitly is an error.
pub fn load_operator_config(path: impl AsRef<Path>, explicit: bool) -> Result<FleexConfig> {
    let path = path.as_ref();
    if !path.exists() && !explicit {
        debug!(path = %path.display(), "no operator config found; using defaults");
        return Ok(FleexConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|e| {
        FleexError::ConfigError(format!("reading {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&contents)?)
}

/// `Fleex.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Fleex.toml")
}
