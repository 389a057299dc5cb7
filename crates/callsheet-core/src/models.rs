//! Core data models for callsheet.
//!
//! These types are shared across all callsheet crates and describe the
//! document store's unit of storage plus the records the clone engine
//! produces around it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Document body: a JSON object keyed by field name.
pub type Fields = serde_json::Map<String, JsonValue>;

// =============================================================================
// FIELD NAMES
// =============================================================================

/// Identifier copy some documents carry inside their body.
pub const FIELD_ID: &str = "id";

/// Owning user of a document.
pub const FIELD_OWNER_ID: &str = "owner_id";

/// Audit: user that created the document.
pub const FIELD_CREATED_BY: &str = "created_by";

/// Audit: user that last updated the document.
pub const FIELD_UPDATED_BY: &str = "updated_by";

/// Audit: creation timestamp (RFC 3339).
pub const FIELD_CREATED_AT: &str = "created_at";

/// Audit: last update timestamp (RFC 3339).
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Clone marker on a root entity.
pub const FIELD_IS_DEMO_CLONE: &str = "is_demo_clone";

/// Back-reference from a cloned root to its source root.
pub const FIELD_CLONED_FROM: &str = "cloned_from";

/// Membership: user granted access.
pub const FIELD_USER_ID: &str = "user_id";

/// Membership: granted role.
pub const FIELD_ROLE: &str = "role";

/// Role granted to the invoking user on a fresh clone.
pub const ROLE_OWNER: &str = "owner";

/// Source-owned fields removed from every cloned body before it is rewritten.
pub const SYSTEM_FIELDS: &[&str] = &[
    FIELD_ID,
    FIELD_OWNER_ID,
    FIELD_CREATED_BY,
    FIELD_UPDATED_BY,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
];

// =============================================================================
// DOCUMENTS
// =============================================================================

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub collection: String,
    /// Root entity (or, for roots, owner namespace) this document belongs to.
    pub parent_id: Option<Uuid>,
    pub data: Fields,
    pub created_at_utc: DateTime<Utc>,
}

impl Document {
    /// Look up a body field.
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.data.get(name)
    }

    /// Read a body field as a UUID, if it holds one.
    pub fn uuid_field(&self, name: &str) -> Option<Uuid> {
        self.data
            .get(name)
            .and_then(JsonValue::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Whether the body carries the given boolean flag set to `value`.
    pub fn has_flag(&self, name: &str, value: bool) -> bool {
        self.data.get(name).and_then(JsonValue::as_bool) == Some(value)
    }
}

/// Document to be created; the id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub parent_id: Option<Uuid>,
    pub data: Fields,
}

impl NewDocument {
    /// Create a new document body under a parent.
    pub fn new(parent_id: Option<Uuid>, data: Fields) -> Self {
        Self { parent_id, data }
    }
}

/// Operation inside a batch write.
///
/// The clone engine only ever creates documents; ids are allocated client
/// side so the identity map can be recorded before the batch commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Create {
        collection: String,
        id: Uuid,
        parent_id: Option<Uuid>,
        data: Fields,
    },
}

impl WriteOp {
    /// Collection this operation writes to.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Create { collection, .. } => collection,
        }
    }

    /// Document id this operation writes.
    pub fn id(&self) -> Uuid {
        match self {
            WriteOp::Create { id, .. } => *id,
        }
    }
}

// =============================================================================
// CLONE RESULTS
// =============================================================================

/// Number of documents cloned into one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCount {
    pub collection: String,
    pub count: usize,
}

/// Persisted identity maps: collection → (source id → clone id).
pub type IdentitySnapshot = BTreeMap<String, BTreeMap<Uuid, Uuid>>;

/// Status of a persisted clone checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Job is (or was, when the process died) still running.
    InProgress,
    /// Job stopped with an error and can be resumed.
    Failed,
}

impl CheckpointStatus {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "failed" => Ok(CheckpointStatus::Failed),
            other => Err(format!("unknown checkpoint status: {}", other)),
        }
    }
}

/// Durable progress record of a clone job, enabling resume after failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneCheckpoint {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub owner_namespace: Uuid,
    pub source_root_id: Uuid,
    pub new_root_id: Uuid,
    pub status: CheckpointStatus,
    /// Collections fully cloned, in clone order.
    pub completed_collections: Vec<String>,
    /// Identity entries for every committed document.
    pub identity: IdentitySnapshot,
    pub counts: Vec<CollectionCount>,
    pub last_error: Option<String>,
    pub updated_at_utc: DateTime<Utc>,
    /// Write generation. Every accepted save or claim bumps it.
    #[serde(default)]
    pub version: i64,
    /// When a resume last took the job over.
    #[serde(default)]
    pub claimed_at_utc: Option<DateTime<Utc>>,
}
