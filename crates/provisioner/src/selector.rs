//! Master selection.
//!
//! The first master in directory order is the default. Every criterion the
//! node reports is compared against every master that reports it; each equal
//! value makes that master the winner. The last match found across both loops
//! wins, so later criteria and later masters take precedence.

use std::sync::Arc;

use tracing::info;

use crate::error::ProvisionError;
use crate::inventory::{Facts, Inventory};
use crate::remote::RemoteMaster;

/// A master together with the inventory it reported this cycle.
#[derive(Clone)]
pub struct MasterCandidate {
    pub master: Arc<dyn RemoteMaster>,
    pub inventory: Inventory,
}

impl MasterCandidate {
    #[must_use]
    pub fn new(master: Arc<dyn RemoteMaster>, inventory: Inventory) -> Self {
        Self { master, inventory }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        self.master.hostname()
    }

    #[must_use]
    pub fn facts(&self) -> &Facts {
        &self.inventory.facts
    }
}

impl std::fmt::Debug for MasterCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterCandidate")
            .field("hostname", &self.hostname())
            .field("inventory", &self.inventory)
            .finish()
    }
}

/// Pick the master a node should be provisioned against.
pub fn select_master<'a>(
    criteria: &[String],
    node_facts: &Facts,
    candidates: &'a [MasterCandidate],
) -> Result<&'a MasterCandidate, ProvisionError> {
    let mut chosen = candidates.first().ok_or(ProvisionError::Selection)?;

    for fact in criteria {
        let Some(node_value) = node_facts.get(fact) else {
            continue;
        };

        for candidate in candidates {
            if candidate.facts().get(fact) == Some(node_value) {
                info!(
                    master = %candidate.hostname(),
                    fact = %fact,
                    value = %node_value,
                    "Picking master based on matching fact"
                );
                chosen = candidate;
            }
        }
    }

    Ok(chosen)
}
