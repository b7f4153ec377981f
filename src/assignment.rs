//! In-memory ledger of experiment assignments for one configuration snapshot.
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{Experiment, VariantChooser, VariantOption, VariantType};

/// The variant (or holdout) a device or user is bucketed into for an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub experiment_id: String,
    pub variant: VariantOption,
    /// Whether the server acknowledged this assignment.
    pub confirmed: bool,
}

impl Assignment {
    pub fn is_holdout(&self) -> bool {
        self.variant.variant_type == VariantType::Holdout
    }
}

/// An assignment waiting to be sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmableAssignment {
    pub experiment_id: String,
    pub variant_id: String,
}

/// A batch of unconfirmed assignments, as drained from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmableAssignments {
    pub assignments: Vec<ConfirmableAssignment>,
}

impl ConfirmableAssignments {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Experiment ids contained in the batch.
    pub fn experiment_ids(&self) -> Vec<String> {
        self.assignments
            .iter()
            .map(|a| a.experiment_id.clone())
            .collect()
    }
}

/// Assignment previously confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAssignment {
    pub experiment_id: String,
    pub variant_id: String,
}

#[derive(Debug, Default)]
struct LedgerState {
    assignments: HashMap<String, Assignment>,
    pending: Vec<ConfirmableAssignment>,
    /// Experiments whose unconfirmed assignment was already queued for confirmation once.
    exposed: HashSet<String>,
}

fn confirmable(assignment: &Assignment) -> ConfirmableAssignment {
    ConfirmableAssignment {
        experiment_id: assignment.experiment_id.clone(),
        variant_id: assignment.variant.id.clone(),
    }
}

/// `AssignmentLedger` keeps at most one assignment per experiment and queues new ones for
/// confirmation.
///
/// Once an experiment is assigned, the variant never changes for the lifetime of the ledger. All
/// operations serialize on one lock, so a drain never loses an assignment enqueued concurrently.
/// The ledger does not talk to the network and does not retry. Callers drain the pending batch,
/// transmit it, and either [`mark_confirmed`](Self::mark_confirmed) or
/// [`requeue`](Self::requeue) it.
#[derive(Debug, Default)]
pub struct AssignmentLedger {
    state: Mutex<LedgerState>,
}

impl AssignmentLedger {
    pub fn new() -> AssignmentLedger {
        AssignmentLedger::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // Ledger operations never panic while holding the lock.
        self.state
            .lock()
            .expect("thread holding assignment ledger lock should not panic")
    }

    /// Return the existing assignment for `experiment`, or bucket a new one with `chooser`, and
    /// queue it for confirmation.
    ///
    /// An unconfirmed assignment is queued the first time it is resolved, including one made
    /// ahead of time by [`preassign`](Self::preassign). Returns `None` only when the experiment
    /// was never assigned and has no variants.
    pub fn resolve(
        &self,
        experiment: &Experiment,
        chooser: &dyn VariantChooser,
    ) -> Option<Assignment> {
        let mut guard = self.state();
        let state = &mut *guard;

        if let Some(existing) = state.assignments.get(&experiment.id) {
            if !existing.confirmed && state.exposed.insert(experiment.id.clone()) {
                state.pending.push(confirmable(existing));
            }
            return Some(existing.clone());
        }

        let assignment = Self::bucket(experiment, chooser)?;
        state.exposed.insert(assignment.experiment_id.clone());
        state.pending.push(confirmable(&assignment));
        state
            .assignments
            .insert(assignment.experiment_id.clone(), assignment.clone());

        Some(assignment)
    }

    /// Like [`resolve`](Self::resolve), but a new assignment is not queued for confirmation.
    ///
    /// Used to pick variants ahead of time (e.g., to preload their paywalls) without telling the
    /// server about experiments the user has not seen yet.
    pub fn preassign(
        &self,
        experiment: &Experiment,
        chooser: &dyn VariantChooser,
    ) -> Option<Assignment> {
        let mut state = self.state();

        if let Some(existing) = state.assignments.get(&experiment.id) {
            return Some(existing.clone());
        }

        let assignment = Self::bucket(experiment, chooser)?;
        state
            .assignments
            .insert(assignment.experiment_id.clone(), assignment.clone());

        Some(assignment)
    }

    fn bucket(experiment: &Experiment, chooser: &dyn VariantChooser) -> Option<Assignment> {
        let assignment = Assignment {
            experiment_id: experiment.id.clone(),
            variant: chooser.choose(experiment)?,
            confirmed: false,
        };

        log::trace!(target: "paywall",
                    experiment_id = assignment.experiment_id.as_str(),
                    variant_id = assignment.variant.id.as_str();
                    "created new assignment");

        Some(assignment)
    }

    /// Move the assignments of `previous`, the ledger of a replaced configuration snapshot, into
    /// this one. `previous` is left empty.
    ///
    /// Assignments whose experiment or variant is gone from `experiments` are dropped and get
    /// bucketed again on their next resolution. An assignment already present here wins, unless
    /// the carried one is confirmed and the present one is not. Pending confirmations move with
    /// their assignment, so nothing queued in `previous` is lost.
    pub fn carry_over(
        &self,
        previous: &AssignmentLedger,
        experiments: &HashMap<String, Experiment>,
    ) {
        if std::ptr::eq(self, previous) {
            return;
        }

        let previous = std::mem::take(&mut *previous.state());
        let mut guard = self.state();
        let state = &mut *guard;

        for (experiment_id, old) in previous.assignments {
            let Some(variant) = experiments
                .get(&experiment_id)
                .and_then(|e| e.variants.iter().find(|v| v.id == old.variant.id))
            else {
                log::debug!(target: "paywall",
                            experiment_id = experiment_id.as_str(),
                            variant_id = old.variant.id.as_str();
                            "dropping assignment to a removed experiment or variant");
                continue;
            };

            match state.assignments.get(&experiment_id) {
                Some(existing) if existing.confirmed || !old.confirmed => continue,
                Some(_) => {
                    state.pending.retain(|p| p.experiment_id != experiment_id);
                    state.exposed.remove(&experiment_id);
                }
                None => {}
            }

            if !old.confirmed && previous.exposed.contains(&experiment_id) {
                state.exposed.insert(experiment_id.clone());
            }
            state.assignments.insert(
                experiment_id.clone(),
                Assignment {
                    experiment_id,
                    variant: variant.clone(),
                    confirmed: old.confirmed,
                },
            );
        }

        for entry in previous.pending {
            let assigned = state
                .assignments
                .get(&entry.experiment_id)
                .is_some_and(|a| !a.confirmed && a.variant.id == entry.variant_id);
            let already_pending = state
                .pending
                .iter()
                .any(|p| p.experiment_id == entry.experiment_id);
            if assigned && !already_pending {
                state.exposed.insert(entry.experiment_id.clone());
                state.pending.push(entry);
            }
        }
    }

    pub fn get(&self, experiment_id: &str) -> Option<Assignment> {
        self.state().assignments.get(experiment_id).cloned()
    }

    /// Atomically empty the pending batch and return its contents.
    pub fn drain_pending_confirmations(&self) -> ConfirmableAssignments {
        ConfirmableAssignments {
            assignments: std::mem::take(&mut self.state().pending),
        }
    }

    /// Put back a drained batch whose transmission failed.
    ///
    /// Entries confirmed in the meantime, or already pending again, are dropped.
    pub fn requeue(&self, batch: ConfirmableAssignments) {
        let mut state = self.state();
        for entry in batch.assignments {
            let confirmed = state
                .assignments
                .get(&entry.experiment_id)
                .is_some_and(|a| a.confirmed);
            let already_pending = state
                .pending
                .iter()
                .any(|p| p.experiment_id == entry.experiment_id);
            if !confirmed && !already_pending {
                state.pending.push(entry);
            }
        }
    }

    /// Mark assignments as confirmed by the server. Idempotent; unknown ids are ignored.
    pub fn mark_confirmed<I, S>(&self, experiment_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for id in experiment_ids {
            let id = id.as_ref();
            match state.assignments.get_mut(id) {
                Some(assignment) => assignment.confirmed = true,
                None => {
                    log::debug!(target: "paywall",
                                experiment_id = id;
                                "ignoring confirmation for unknown experiment");
                    continue;
                }
            }
            state.pending.retain(|p| p.experiment_id != id);
        }
    }

    /// Seed the ledger with assignments the server already confirmed.
    ///
    /// Assignments referencing unknown experiments or variants are skipped. A confirmed assignment
    /// is never moved to a different variant.
    pub fn apply_server_assignments(
        &self,
        server_assignments: impl IntoIterator<Item = ServerAssignment>,
        experiments: &HashMap<String, Experiment>,
    ) {
        let mut state = self.state();
        for server_assignment in server_assignments {
            let Some(variant) = experiments
                .get(&server_assignment.experiment_id)
                .and_then(|e| {
                    e.variants
                        .iter()
                        .find(|v| v.id == server_assignment.variant_id)
                })
            else {
                log::debug!(target: "paywall",
                            experiment_id = server_assignment.experiment_id.as_str(),
                            variant_id = server_assignment.variant_id.as_str();
                            "skipping server assignment for unknown experiment or variant");
                continue;
            };

            if let Some(existing) = state.assignments.get(&server_assignment.experiment_id) {
                if existing.confirmed && existing.variant.id != variant.id {
                    log::warn!(target: "paywall",
                               experiment_id = server_assignment.experiment_id.as_str(),
                               variant_id = existing.variant.id.as_str(),
                               server_variant_id = variant.id.as_str();
                               "server assignment conflicts with confirmed assignment, keeping local");
                    continue;
                }
            }

            state
                .pending
                .retain(|p| p.experiment_id != server_assignment.experiment_id);
            state.assignments.insert(
                server_assignment.experiment_id.clone(),
                Assignment {
                    experiment_id: server_assignment.experiment_id,
                    variant: variant.clone(),
                    confirmed: true,
                },
            );
        }
    }

    /// Paywall identifiers of all treatment assignments. These are the paywalls worth preloading.
    pub fn active_treatment_paywall_ids(&self) -> HashSet<String> {
        self.state()
            .assignments
            .values()
            .filter(|a| !a.is_holdout())
            .filter_map(|a| a.variant.paywall_id.clone())
            .collect()
    }
}
