use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::{AssignmentLedger, Configuration, Experiment, TriggerRegistry};

/// Everything derived from one fetched [`Configuration`].
///
/// A snapshot is immutable apart from its assignment ledger. When a snapshot is replaced, its
/// assignments are carried into the next one (see [`AssignmentLedger::carry_over`]).
#[derive(Debug)]
pub struct ConfigurationSnapshot {
    configuration: Configuration,
    registry: TriggerRegistry,
    ledger: AssignmentLedger,
    fetched_at: DateTime<Utc>,
}

impl ConfigurationSnapshot {
    pub fn new(configuration: Configuration) -> ConfigurationSnapshot {
        let registry = TriggerRegistry::from_configuration(&configuration.triggers);
        ConfigurationSnapshot {
            configuration,
            registry,
            ledger: AssignmentLedger::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &AssignmentLedger {
        &self.ledger
    }

    pub fn experiment(&self, experiment_id: &str) -> Option<&Experiment> {
        self.configuration.experiments.get(experiment_id)
    }

    /// When the configuration was fetched.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// `ConfigurationStore` provides a Sync storage for the active snapshot that allows concurrent
/// access for readers and writers.
///
/// Readers get an `Arc` to the snapshot, so a decision keeps using the same snapshot even if a
/// refresh replaces it midway.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    snapshot: RwLock<Option<Arc<ConfigurationSnapshot>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    pub fn get_configuration(&self) -> Option<Arc<ConfigurationSnapshot>> {
        // The slot only ever holds a complete snapshot, so a poisoned lock (writer panicked while
        // holding it) still guards a consistent value.
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.clone()
    }

    /// Set a new snapshot, returning the previous one.
    pub fn set_configuration(
        &self,
        snapshot: Arc<ConfigurationSnapshot>,
    ) -> Option<Arc<ConfigurationSnapshot>> {
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, Some(snapshot))
    }
}
