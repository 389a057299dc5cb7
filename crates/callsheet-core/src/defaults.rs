//! Centralized default constants for callsheet.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// COLLECTIONS
// =============================================================================

/// Root collection holding projects.
pub const ROOT_COLLECTION: &str = "projects";

/// Access-control records, parented by the project they grant access to.
pub const MEMBERSHIP_COLLECTION: &str = "project_members";

/// Account records created at signup, parented by the owner namespace.
pub const ACCOUNT_COLLECTION: &str = "accounts";

// =============================================================================
// CLONE
// =============================================================================

/// Maximum operations a single store batch accepts.
///
/// Matches the write-batch ceiling of the document stores the application
/// has historically run on.
pub const STORE_MAX_BATCH_SIZE: usize = 500;

/// Default number of create operations per clone batch.
///
/// Kept below [`STORE_MAX_BATCH_SIZE`] so a batch never hits the ceiling.
pub const CLONE_BATCH_SIZE: usize = 450;

/// Whether clone jobs persist checkpoints by default.
pub const CLONE_CHECKPOINTS_ENABLED: bool = false;

/// Seconds without checkpoint progress before an in-progress job may be
/// taken over by a resume.
pub const CLONE_RESUME_LEASE_SECS: u64 = 300;

/// How many times the identity mapper regenerates a colliding id.
pub const IDENTITY_ALLOCATION_ATTEMPTS: usize = 8;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Interval between orphan sweeps (seconds).
pub const RECONCILE_INTERVAL_SECS: u64 = 3600;

/// Minimum age of an unowned clone root before it is swept (seconds).
///
/// Gives an in-flight clone job (and an operator re-granting ownership)
/// time to finish before its root counts as an orphan.
pub const ORPHAN_GRACE_SECS: u64 = 86_400;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Broadcast capacity of the event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_within_store_limit() {
        assert!(CLONE_BATCH_SIZE <= STORE_MAX_BATCH_SIZE);
        assert!(CLONE_BATCH_SIZE > 0);
    }

    #[test]
    fn test_grace_period_exceeds_sweep_interval() {
        assert!(ORPHAN_GRACE_SECS >= RECONCILE_INTERVAL_SECS);
    }
}
