// src/fleet/inventory.rs

//! Static fleet provider backed by the `[[machine]]` list in `Fleex.toml`.
//!
//! Useful for fleets provisioned by other tooling. It cannot create machines
//! or images; deletes only forget entries for the lifetime of the process.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::errors::{FleexError, Result};
use crate::fleet::{FleetProvider, Machine};
use crate::types::BoxFuture;

#[derive(Debug, Default)]
pub struct StaticInventory {
    machines: Mutex<Vec<Machine>>,
}

impl StaticInventory {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self {
            machines: Mutex::new(machines),
        }
    }

    fn matching(&self, name: &str) -> Vec<Machine> {
        let guard = self.machines.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Machine> = guard
            .iter()
            .filter(|m| m.label.starts_with(name))
            .cloned()
            .collect();
        found.sort_by(|a, b| label_sort_key(&a.label).cmp(&label_sort_key(&b.label)));
        found
    }

    fn remove_where(&self, pred: impl Fn(&Machine) -> bool) -> usize {
        let mut guard = self.machines.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|m| !pred(m));
        before - guard.len()
    }
}

/// Order `scan-2` before `scan-10`.
fn label_sort_key(label: &str) -> (&str, u64, &str) {
    let digits = label
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let (stem, num) = label.split_at(label.len() - digits);
    (stem, num.parse().unwrap_or(0), label)
}

impl FleetProvider for StaticInventory {
    fn list_fleet<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<Machine>>> {
        Box::pin(async move { Ok(self.matching(name)) })
    }

    fn spawn<'a>(&'a self, name: &'a str, count: usize) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(FleexError::Unsupported(format!(
                "static inventory cannot spawn {count} machine(s) for '{name}'"
            )))
        })
    }

    fn delete_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let removed = self.remove_where(|m| m.id == id);
            if removed == 0 {
                warn!(id, "delete requested for unknown machine id");
            } else {
                info!(id, "machine removed from static inventory");
            }
            Ok(())
        })
    }

    fn delete_fleet<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let removed = self.remove_where(|m| m.label.starts_with(name));
            info!(fleet = name, removed, "fleet removed from static inventory");
            Ok(())
        })
    }

    fn create_image<'a>(
        &'a self,
        machine_id: &'a str,
        label: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(FleexError::Unsupported(format!(
                "static inventory cannot snapshot machine {machine_id} as '{label}'"
            )))
        })
    }
}
