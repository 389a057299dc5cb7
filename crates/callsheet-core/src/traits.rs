//! Core traits for callsheet storage abstractions.
//!
//! These traits define the interfaces that concrete backends must satisfy,
//! keeping the clone engine independent of any particular database product
//! and testable against an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Document store consumed by the clone engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection` whose parent is `parent_id`.
    async fn read_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<Vec<Document>>;

    /// Fetch one document by id.
    async fn get_document(&self, collection: &str, id: Uuid) -> Result<Option<Document>>;

    /// Create one document; the store allocates and returns its id.
    async fn create_document(&self, collection: &str, doc: NewDocument) -> Result<Uuid>;

    /// Commit one batch atomically: either every op is applied or none is.
    ///
    /// Callers must keep `ops.len()` within [`DocumentStore::max_batch_size`].
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Documents of `collection` under `owner_scope` whose boolean body field
    /// `flag_field` equals `flag_value`.
    async fn query_by_flag(
        &self,
        collection: &str,
        owner_scope: Uuid,
        flag_field: &str,
        flag_value: bool,
    ) -> Result<Vec<Document>>;

    /// Maximum number of operations one batch may hold.
    fn max_batch_size(&self) -> usize {
        crate::defaults::STORE_MAX_BATCH_SIZE
    }

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

// =============================================================================
// MAINTENANCE
// =============================================================================

/// Cross-namespace reads and deletes used by orphan reconciliation.
///
/// Kept apart from [`DocumentStore`] so the clone path can never delete.
#[async_trait]
pub trait MaintenanceStore: DocumentStore {
    /// Documents of `collection` in every scope whose flag equals `flag_value`.
    async fn list_flagged(
        &self,
        collection: &str,
        flag_field: &str,
        flag_value: bool,
    ) -> Result<Vec<Document>>;

    /// Delete every document of `collection` under `parent_id`; returns the count.
    async fn delete_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<u64>;

    /// Delete one document; returns whether it existed.
    async fn delete_document(&self, collection: &str, id: Uuid) -> Result<bool>;
}

// =============================================================================
// CHECKPOINTS
// =============================================================================

/// Persistence for clone-job checkpoints.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Write `checkpoint` unless another writer got there first.
    ///
    /// A version 0 checkpoint is inserted only when no row exists for the
    /// job; any other version must equal the stored one. An accepted save
    /// stores `version + 1`. Returns `false` when the write was refused.
    async fn save(&self, checkpoint: &CloneCheckpoint) -> Result<bool>;

    /// Take a stored checkpoint over for a resume.
    ///
    /// Compare-and-set on `expected_version`: the row is marked in progress,
    /// claimed at `now` and its version bumped. Returns the claimed
    /// checkpoint, or `None` when the version moved or the row is gone.
    async fn claim(
        &self,
        job_id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<CloneCheckpoint>>;

    /// Load a checkpoint by job id.
    async fn load(&self, job_id: Uuid) -> Result<Option<CloneCheckpoint>>;

    /// Remove a checkpoint once its job completed.
    async fn delete(&self, job_id: Uuid) -> Result<()>;

    /// Every stored checkpoint, oldest first.
    async fn list(&self) -> Result<Vec<CloneCheckpoint>>;

    /// Whether a checkpoint exists for the given clone root.
    async fn exists_for_root(&self, new_root_id: Uuid) -> Result<bool>;
}
