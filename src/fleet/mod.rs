// src/fleet/mod.rs

//! Fleet model and the provider interface.
//!
//! The engine never creates or mutates machines. It asks a [`FleetProvider`]
//! for the current members of a fleet at the start of a run and reads them.
//! Control-plane operations (spawn, delete, snapshot) are passed through for
//! the orchestration layer's teardown and for callers that manage fleets.

pub mod inventory;

use serde::Deserialize;

use crate::errors::{FleexError, Result};
use crate::types::BoxFuture;

pub use inventory::StaticInventory;

/// One remote machine as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Machine {
    pub id: String,
    pub label: String,
    pub ip: String,
    /// Provider-specific; opaque to the engine.
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "running".to_string()
}

impl Machine {
    pub fn new(id: impl Into<String>, label: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ip: ip.into(),
            status: default_status(),
        }
    }
}

/// Ordered machines sharing a name prefix.
///
/// Index `i` in this list is machine `i` for chunk assignment, for the whole
/// lifetime of a run.
#[derive(Debug, Clone)]
pub struct Fleet {
    pub name: String,
    machines: Vec<Machine>,
}

impl Fleet {
    pub fn new(name: impl Into<String>, machines: Vec<Machine>) -> Self {
        Self {
            name: name.into(),
            machines,
        }
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// `(index, machine)` pairs in fleet order.
    pub fn indexed(&self) -> Vec<(usize, Machine)> {
        self.machines.iter().cloned().enumerate().collect()
    }
}

/// Cloud-provider control plane, consumed by the orchestration layer.
pub trait FleetProvider: Send + Sync {
    /// Machines whose label starts with `name`, in a stable order.
    fn list_fleet<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<Machine>>>;

    fn spawn<'a>(&'a self, name: &'a str, count: usize) -> BoxFuture<'a, Result<()>>;

    fn delete_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn delete_fleet<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn create_image<'a>(&'a self, machine_id: &'a str, label: &'a str)
    -> BoxFuture<'a, Result<()>>;
}

/// Fetch a fleet, failing with `NoFleet` when it has no members.
pub async fn fetch_fleet(provider: &dyn FleetProvider, name: &str) -> Result<Fleet> {
    let machines = provider.list_fleet(name).await?;
    if machines.is_empty() {
        return Err(FleexError::NoFleet(name.to_string()));
    }
    Ok(Fleet::new(name, machines))
}
