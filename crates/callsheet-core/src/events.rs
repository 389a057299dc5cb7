//! Clone event types, envelope, and event bus.
//!
//! The clone engine reports every job outcome here in addition to its
//! return value. Callers that swallow clone failures (account provisioning)
//! still leave a trail: downstream consumers subscribe independently and
//! turn events into logs or alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned event envelope.
///
/// `event_type` uses dot-namespaced names (e.g. `"clone.failed"`); the
/// `payload` carries the domain data.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Correlation ID for tracing related events (the clone job id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: CloneEvent,
}

impl EventEnvelope {
    /// Wrap an event, correlating it with its job.
    pub fn new(event: CloneEvent) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            correlation_id: event.job_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Clone Event (domain payloads)
// ============================================================================

/// Lifecycle events of clone jobs and orphan reconciliation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CloneEvent {
    /// A clone job passed the duplicate guard and is about to write.
    CloneStarted {
        job_id: Uuid,
        owner_id: Uuid,
        source_root_id: Uuid,
    },
    /// One collection finished cloning.
    CollectionCloned {
        job_id: Uuid,
        collection: String,
        count: usize,
    },
    /// The owner already has a clone; nothing was written.
    CloneSkipped { job_id: Uuid, owner_namespace: Uuid },
    /// A clone job completed.
    CloneCompleted {
        job_id: Uuid,
        new_root_id: Uuid,
        documents: usize,
        duration_ms: u64,
    },
    /// A clone job failed.
    CloneFailed {
        job_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_root_id: Option<Uuid>,
        error_kind: String,
        error: String,
        /// True when the failure left a populated root without an owner.
        orphaned: bool,
    },
    /// The reconciler removed an unowned clone root and its dependents.
    OrphanSwept { root_id: Uuid, documents: u64 },
}

impl CloneEvent {
    /// Returns the namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            CloneEvent::CloneStarted { .. } => "clone.started",
            CloneEvent::CollectionCloned { .. } => "clone.collection",
            CloneEvent::CloneSkipped { .. } => "clone.skipped",
            CloneEvent::CloneCompleted { .. } => "clone.completed",
            CloneEvent::CloneFailed { .. } => "clone.failed",
            CloneEvent::OrphanSwept { .. } => "clone.orphan_swept",
        }
    }

    /// Clone job this event belongs to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            CloneEvent::CloneStarted { job_id, .. }
            | CloneEvent::CollectionCloned { job_id, .. }
            | CloneEvent::CloneSkipped { job_id, .. }
            | CloneEvent::CloneCompleted { job_id, .. }
            | CloneEvent::CloneFailed { job_id, .. } => Some(*job_id),
            CloneEvent::OrphanSwept { .. } => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing clone events to consumers.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped if nobody listens.
    pub fn emit(&self, event: CloneEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
