// src/template.rs

//! Placeholder expansion for remote commands.
//!
//! Recognised tokens:
//! - `{KEY}` and `{vars.KEY}`: a variable (including the synthetic `INPUT`
//!   and `OUTPUT`).
//! - `{stepId.OUTPUT}`: the remote output path of an earlier step.
//!
//! Expansion is a single left-to-right pass over the template. Substituted
//! values are never re-scanned, so a value that itself looks like a
//! placeholder is emitted verbatim. Tokens with no value are left as they are.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{FleexError, Result};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_-]*)(?:\.([A-Za-z_][A-Za-z0-9_-]*))?\}")
        .expect("placeholder pattern is valid")
});

/// A well-formed placeholder found in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder<'a> {
    Var(&'a str),
    StepOutput(&'a str),
}

fn classify<'a>(caps: &Captures<'a>) -> Option<Placeholder<'a>> {
    let first = caps.get(1)?.as_str();
    match caps.get(2).map(|m| m.as_str()) {
        None => Some(Placeholder::Var(first)),
        Some(key) if first == "vars" => Some(Placeholder::Var(key)),
        Some("OUTPUT") => Some(Placeholder::StepOutput(first)),
        Some(_) => None,
    }
}

/// All placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> impl Iterator<Item = Placeholder<'_>> {
    TOKEN.captures_iter(template).filter_map(|caps| classify(&caps))
}

/// Variable table for one expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars {
    values: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: &BTreeMap<String, String>) -> Self {
        Self {
            values: values.clone(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Register `{step_id.OUTPUT}`.
    pub fn set_output(&mut self, step_id: impl Into<String>, path: impl Into<String>) -> &mut Self {
        self.outputs.insert(step_id.into(), path.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overlay `other` on top of `self`.
    pub fn extend(&mut self, other: &BTreeMap<String, String>) {
        for (k, v) in other {
            self.values.insert(k.clone(), v.clone());
        }
    }

    fn lookup(&self, placeholder: Placeholder<'_>) -> Option<&str> {
        match placeholder {
            Placeholder::Var(key) => self.values.get(key),
            Placeholder::StepOutput(id) => self.outputs.get(id),
        }
        .map(String::as_str)
    }

    /// Fail with `MissingRequiredVar` for the first absent key.
    pub fn require(&self, keys: &[&str]) -> Result<()> {
        match keys.iter().find(|k| !self.values.contains_key(**k)) {
            Some(missing) => Err(FleexError::MissingRequiredVar(missing.to_string())),
            None => Ok(()),
        }
    }
}

/// Expand every resolvable placeholder in `template`.
pub fn expand(template: &str, vars: &Vars) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            classify(caps)
                .and_then(|p| vars.lookup(p))
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
