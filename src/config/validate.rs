// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{BuildRecipe, RawBuildRecipe, RawWorkflow, Workflow};
use crate::errors::{FleexError, Result};
use crate::template::{placeholders, Placeholder};
use crate::types::ScaleMode;

impl TryFrom<RawWorkflow> for Workflow {
    type Error = FleexError;

    fn try_from(raw: RawWorkflow) -> std::result::Result<Self, Self::Error> {
        validate_workflow(&raw)?;
        Ok(Workflow::new_unchecked(raw))
    }
}

impl TryFrom<RawBuildRecipe> for BuildRecipe {
    type Error = FleexError;

    fn try_from(raw: RawBuildRecipe) -> std::result::Result<Self, Self::Error> {
        validate_recipe(&raw)?;
        Ok(BuildRecipe::new_unchecked(raw))
    }
}

/// Check a workflow for structural problems that would otherwise only show
/// up halfway through a run on every machine.
pub fn validate_workflow(wf: &RawWorkflow) -> Result<()> {
    if wf.steps.is_empty() {
        return Err(FleexError::ConfigError(format!(
            "workflow '{}' must contain at least one step",
            wf.name
        )));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();

    for step in wf.steps.iter() {
        if step.command.trim().is_empty() {
            return Err(FleexError::ConfigError(format!(
                "step '{}' has an empty command",
                step.name
            )));
        }

        for placeholder in placeholders(&step.command) {
            if let Placeholder::StepOutput(id) = placeholder {
                if !seen_ids.contains(id) {
                    return Err(FleexError::ConfigError(format!(
                        "step '{}' references '{{{}.OUTPUT}}' but no earlier step has id '{}'",
                        step.name, id, id
                    )));
                }
            }
        }

        if let Some(ref var) = step.split_var {
            if !wf.vars.contains_key(var) {
                return Err(FleexError::ConfigError(format!(
                    "step '{}' splits on unknown variable '{}'",
                    step.name, var
                )));
            }
        }

        if step.scale_mode == Some(ScaleMode::Vertical) && step.split_var.is_none() {
            return Err(FleexError::ConfigError(format!(
                "step '{}' uses vertical scale mode without a split-var",
                step.name
            )));
        }

        if let Some(ref id) = step.id {
            if !seen_ids.insert(id.as_str()) {
                return Err(FleexError::ConfigError(format!(
                    "duplicate step id '{}'",
                    id
                )));
            }
        }
    }

    Ok(())
}

pub fn validate_recipe(recipe: &RawBuildRecipe) -> Result<()> {
    if recipe.steps.is_empty() {
        return Err(FleexError::ConfigError(format!(
            "build recipe '{}' must contain at least one step",
            recipe.name
        )));
    }

    for step in recipe.steps.iter() {
        if step.commands.iter().all(|c| c.trim().is_empty()) {
            return Err(FleexError::ConfigError(format!(
                "build step '{}' has no commands",
                step.name
            )));
        }
        if step.retries == Some(0) {
            return Err(FleexError::ConfigError(format!(
                "build step '{}': retries must be >= 1 (got 0)",
                step.name
            )));
        }
    }

    for check in recipe.verify.iter() {
        if check.command.trim().is_empty() {
            return Err(FleexError::ConfigError(format!(
                "verification '{}' has an empty command",
                check.name
            )));
        }
    }

    Ok(())
}
