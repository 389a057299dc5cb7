//! Structured logging schema for callsheet.
//!
//! The field names every crate logs under, so log aggregation can query
//! clone jobs by owner, collection or root across subsystems. `tracing`
//! macros take field names as literals; call sites spell out the names
//! listed here and [`FIELDS`] is the full set.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention (orphaned clones) |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), clone job completions |
//! | DEBUG | Decision points, per-collection progress, config choices |
//! | TRACE | Per-document iteration, per-batch commits |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "clone"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "cloner", "guard", "reconciler", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "clone_template", "batch_write", "sweep"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Clone job UUID.
pub const JOB_ID: &str = "job_id";

/// Invoking user.
pub const OWNER_ID: &str = "owner_id";

/// Namespace the new root is created in.
pub const OWNER_NAMESPACE: &str = "owner_namespace";

/// Template root being cloned.
pub const SOURCE_ROOT_ID: &str = "source_root_id";

/// Root created by the clone.
pub const NEW_ROOT_ID: &str = "new_root_id";

/// Collection being read or written.
pub const COLLECTION: &str = "collection";

/// Correlation id of a clone event (the job id).
pub const CORRELATION_ID: &str = "correlation_id";

/// Dotted clone event type, e.g. "clone.failed".
pub const EVENT_TYPE: &str = "event_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of documents read or written.
pub const DOC_COUNT: &str = "doc_count";

/// Number of operations in a batch.
pub const BATCH_SIZE: &str = "batch_size";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Stable error kind (e.g. "collection_write_failure").
pub const ERROR_KIND: &str = "error_kind";

/// Whether a failure left an unowned clone root behind.
pub const ORPHANED: &str = "orphaned";

/// Every field name above.
pub const FIELDS: &[&str] = &[
    SUBSYSTEM,
    COMPONENT,
    OPERATION,
    JOB_ID,
    OWNER_ID,
    OWNER_NAMESPACE,
    SOURCE_ROOT_ID,
    NEW_ROOT_ID,
    COLLECTION,
    CORRELATION_ID,
    EVENT_TYPE,
    DURATION_MS,
    DOC_COUNT,
    BATCH_SIZE,
    POOL_SIZE,
    POOL_IDLE,
    ERROR_MSG,
    ERROR_KIND,
    ORPHANED,
];
