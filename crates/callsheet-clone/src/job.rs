//! Clone job record and its state machine.
//!
//! ```text
//! NotStarted -> DuplicateChecked -> Cloning[0] -> ... -> Cloning[N-1]
//!     -> MembershipProvisioned -> Completed
//! ```
//!
//! `Failed` is reachable from every non-terminal state. `Completed` and
//! `Failed` are terminal.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use callsheet_core::{CloneCheckpoint, CollectionCount};

use crate::error::{CloneError, Result};

/// Lifecycle state of a clone job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CloneState {
    NotStarted,
    DuplicateChecked,
    /// Cloning the collection at `index` in clone order.
    Cloning { index: usize },
    MembershipProvisioned,
    Completed,
    Failed { reason: String },
}

impl CloneState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloneState::Completed | CloneState::Failed { .. })
    }
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneState::NotStarted => write!(f, "not_started"),
            CloneState::DuplicateChecked => write!(f, "duplicate_checked"),
            CloneState::Cloning { index } => write!(f, "cloning[{}]", index),
            CloneState::MembershipProvisioned => write!(f, "membership_provisioned"),
            CloneState::Completed => write!(f, "completed"),
            CloneState::Failed { reason } => write!(f, "failed({})", reason),
        }
    }
}

/// In-memory run record of one clone job.
#[derive(Debug, Clone, Serialize)]
pub struct CloneJob {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub owner_namespace: Uuid,
    pub source_root_id: Uuid,
    pub new_root_id: Option<Uuid>,
    pub counts: Vec<CollectionCount>,
    state: CloneState,
    collection_total: usize,
}

impl CloneJob {
    /// Fresh job for a schema with `collection_total` dependent collections.
    pub fn new(
        job_id: Uuid,
        owner_id: Uuid,
        owner_namespace: Uuid,
        source_root_id: Uuid,
        collection_total: usize,
    ) -> Self {
        Self {
            job_id,
            owner_id,
            owner_namespace,
            source_root_id,
            new_root_id: None,
            counts: Vec::new(),
            state: CloneState::NotStarted,
            collection_total,
        }
    }

    /// Job rebuilt from a checkpoint. The root exists, so it restarts at the
    /// first collection; completed collections are skipped by the caller.
    pub fn resumed(checkpoint: &CloneCheckpoint, collection_total: usize) -> Self {
        Self {
            job_id: checkpoint.job_id,
            owner_id: checkpoint.owner_id,
            owner_namespace: checkpoint.owner_namespace,
            source_root_id: checkpoint.source_root_id,
            new_root_id: Some(checkpoint.new_root_id),
            counts: checkpoint.counts.clone(),
            state: CloneState::Cloning { index: 0 },
            collection_total,
        }
    }

    pub fn state(&self) -> &CloneState {
        &self.state
    }

    /// Move to `next`, rejecting any transition the state machine forbids.
    pub fn transition(&mut self, next: CloneState) -> Result<()> {
        let legal = match (&self.state, &next) {
            (current, _) if current.is_terminal() => false,
            (_, CloneState::Failed { .. }) => true,
            (CloneState::NotStarted, CloneState::DuplicateChecked) => true,
            (CloneState::DuplicateChecked, CloneState::Cloning { index: 0 }) => true,
            (CloneState::Cloning { index: i }, CloneState::Cloning { index: j }) => *j == i + 1,
            (CloneState::Cloning { index }, CloneState::MembershipProvisioned) => {
                index + 1 >= self.collection_total
            }
            (CloneState::MembershipProvisioned, CloneState::Completed) => true,
            _ => false,
        };
        if !legal {
            return Err(CloneError::InvalidTransition {
                from: self.state.clone(),
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record the terminal failure; no-op when already terminal.
    pub fn fail(&mut self, error: &CloneError) {
        if !self.state.is_terminal() {
            self.state = CloneState::Failed {
                reason: error.kind().to_string(),
            };
        }
    }

    /// Set (or replace, on resume) the clone count of one collection.
    pub fn record_count(&mut self, collection: &str, count: usize) {
        match self.counts.iter_mut().find(|c| c.collection == collection) {
            Some(existing) => existing.count = count,
            None => self.counts.push(CollectionCount {
                collection: collection.to_string(),
                count,
            }),
        }
    }

    /// Documents cloned across every collection, the root excluded.
    pub fn total_documents(&self) -> usize {
        self.counts.iter().map(|c| c.count).sum()
    }
}
