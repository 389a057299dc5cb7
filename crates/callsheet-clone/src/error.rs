//! Clone engine error types.

use thiserror::Error;
use uuid::Uuid;

use crate::job::CloneState;

/// Result type for clone operations.
pub type Result<T> = std::result::Result<T, CloneError>;

/// Failure of a clone job, or of the operations around it.
///
/// Variants name how far a job got: anything raised after the new root was
/// written leaves committed documents behind, which is reported rather than
/// undone.
#[derive(Debug, Error)]
pub enum CloneError {
    /// Duplicate check or source root read failed; nothing was written.
    #[error("clone source unavailable: {0}")]
    SourceUnavailable(#[source] callsheet_core::Error),

    /// The owner namespace already holds a clone. Not a fault.
    #[error("owner namespace {owner_namespace} already has demo clone {existing_root_id}")]
    DuplicateExists {
        owner_namespace: Uuid,
        existing_root_id: Uuid,
    },

    #[error("failed to read collection '{collection}': {source}")]
    CollectionReadFailure {
        collection: String,
        #[source]
        source: callsheet_core::Error,
    },

    #[error("failed to write batch {batch_index} of collection '{collection}': {source}")]
    CollectionWriteFailure {
        collection: String,
        batch_index: usize,
        #[source]
        source: callsheet_core::Error,
    },

    #[error("failed to create clone root: {0}")]
    RootCreationFailure(#[source] callsheet_core::Error),

    /// Every collection was cloned but the owner was never granted access.
    #[error("clone root {new_root_id} is fully populated but has no owner: {source}")]
    MembershipProvisioningFailure {
        new_root_id: Uuid,
        #[source]
        source: callsheet_core::Error,
    },

    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(#[source] callsheet_core::Error),

    #[error("identity allocation failed in '{collection}': {reason}")]
    Identity { collection: String, reason: String },

    #[error("invalid clone state transition: {from} -> {to}")]
    InvalidTransition { from: CloneState, to: CloneState },

    #[error("no resumable clone job {0}")]
    JobNotFound(Uuid),

    /// The job's checkpoint was taken over by another run.
    #[error("clone job {0} is claimed by another run")]
    JobClaimed(Uuid),

    /// The job made checkpoint progress within the resume lease.
    #[error("clone job {0} is still running")]
    JobInProgress(Uuid),

    #[error("clone root {0} not found")]
    RootNotFound(Uuid),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CloneError {
    /// True for the duplicate short-circuit, which callers treat as success.
    pub fn is_noop(&self) -> bool {
        matches!(self, CloneError::DuplicateExists { .. })
    }

    /// True when the job left a fully cloned root that nobody owns.
    pub fn is_orphaning(&self) -> bool {
        matches!(self, CloneError::MembershipProvisioningFailure { .. })
    }

    /// Stable snake_case name, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CloneError::SourceUnavailable(_) => "source_unavailable",
            CloneError::DuplicateExists { .. } => "duplicate_exists",
            CloneError::CollectionReadFailure { .. } => "collection_read_failure",
            CloneError::CollectionWriteFailure { .. } => "collection_write_failure",
            CloneError::RootCreationFailure(_) => "root_creation_failure",
            CloneError::MembershipProvisioningFailure { .. } => "membership_provisioning_failure",
            CloneError::Checkpoint(_) => "checkpoint",
            CloneError::Identity { .. } => "identity",
            CloneError::InvalidTransition { .. } => "invalid_transition",
            CloneError::JobNotFound(_) => "job_not_found",
            CloneError::JobClaimed(_) => "job_claimed",
            CloneError::JobInProgress(_) => "job_in_progress",
            CloneError::RootNotFound(_) => "root_not_found",
            CloneError::Config(_) => "config",
        }
    }

    /// Collection the failure is attributed to, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            CloneError::CollectionReadFailure { collection, .. }
            | CloneError::CollectionWriteFailure { collection, .. }
            | CloneError::Identity { collection, .. } => Some(collection),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_is_noop_not_orphaning() {
        let err = CloneError::DuplicateExists {
            owner_namespace: Uuid::nil(),
            existing_root_id: Uuid::nil(),
        };
        assert!(err.is_noop());
        assert!(!err.is_orphaning());
        assert_eq!(err.kind(), "duplicate_exists");
    }

    #[test]
    fn test_membership_failure_is_orphaning() {
        let err = CloneError::MembershipProvisioningFailure {
            new_root_id: Uuid::nil(),
            source: callsheet_core::Error::Store("down".into()),
        };
        assert!(err.is_orphaning());
        assert!(!err.is_noop());
        assert!(err.to_string().contains("no owner"));
    }

    #[test]
    fn test_write_failure_names_collection_and_batch() {
        let err = CloneError::CollectionWriteFailure {
            collection: "scenes".into(),
            batch_index: 2,
            source: callsheet_core::Error::Store("timeout".into()),
        };
        assert_eq!(err.collection(), Some("scenes"));
        let msg = err.to_string();
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("'scenes'"));
    }
}
