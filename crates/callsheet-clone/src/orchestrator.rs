//! Clone orchestration.
//!
//! Runs one clone job end to end: duplicate guard, root creation, every
//! collection in schema order, owner membership. There is no transaction
//! across collections. A failure stops the job where it is and leaves what
//! was committed; with checkpoints enabled the job can later be resumed from
//! its last committed batch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use callsheet_core::{
    defaults::{CLONE_BATCH_SIZE, CLONE_CHECKPOINTS_ENABLED, CLONE_RESUME_LEASE_SECS},
    new_v7, CheckpointRepository, CheckpointStatus, CloneCheckpoint, CloneEvent, CloneSchema,
    CollectionCount, Document, DocumentStore, EventBus, NewDocument, FIELD_CLONED_FROM,
    FIELD_IS_DEMO_CLONE, FIELD_OWNER_ID,
};

use crate::cloner::{
    stamp_ownership, strip_system_fields, BatchObserver, CloneTarget, CollectionCloner,
    CollectionReport,
};
use crate::error::{CloneError, Result};
use crate::guard::DuplicateGuard;
use crate::identity::IdentityMapper;
use crate::job::{CloneJob, CloneState};
use crate::membership::MembershipProvisioner;
use crate::reader::SourceGraphReader;

/// Clone engine configuration.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    /// Root entity every new account receives a copy of.
    pub template_root_id: Option<Uuid>,
    /// Documents per write batch, before the store's own cap.
    pub batch_size: usize,
    /// Persist progress after every committed batch.
    pub checkpoints_enabled: bool,
    /// How long an in-progress job must go without checkpoint progress
    /// before a resume may take it over.
    pub resume_lease: Duration,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            template_root_id: None,
            batch_size: CLONE_BATCH_SIZE,
            checkpoints_enabled: CLONE_CHECKPOINTS_ENABLED,
            resume_lease: Duration::from_secs(CLONE_RESUME_LEASE_SECS),
        }
    }
}

impl CloneConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DEMO_TEMPLATE_PROJECT_ID` | unset | Template root id |
    /// | `CLONE_BATCH_SIZE` | `450` | Documents per batch (capped by the store) |
    /// | `CLONE_CHECKPOINTS_ENABLED` | `false` | Enable checkpoint/resume |
    /// | `CLONE_RESUME_LEASE_SECS` | `300` | Idle time before a running job may be resumed |
    pub fn from_env() -> Self {
        let template_root_id = match std::env::var("DEMO_TEMPLATE_PROJECT_ID") {
            Ok(v) if !v.trim().is_empty() => match Uuid::parse_str(v.trim()) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        subsystem = "clone",
                        component = "config",
                        value = %v,
                        error = %e,
                        "Ignoring malformed DEMO_TEMPLATE_PROJECT_ID"
                    );
                    None
                }
            },
            _ => None,
        };

        let batch_size = std::env::var("CLONE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(CLONE_BATCH_SIZE)
            .max(1);

        let checkpoints_enabled = std::env::var("CLONE_CHECKPOINTS_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(CLONE_CHECKPOINTS_ENABLED);

        let resume_lease = std::env::var("CLONE_RESUME_LEASE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(CLONE_RESUME_LEASE_SECS));

        Self {
            template_root_id,
            batch_size,
            checkpoints_enabled,
            resume_lease,
        }
    }

    pub fn with_template_root_id(mut self, id: Uuid) -> Self {
        self.template_root_id = Some(id);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints_enabled = enabled;
        self
    }

    pub fn with_resume_lease(mut self, lease: Duration) -> Self {
        self.resume_lease = lease;
        self
    }
}

/// Result of a completed clone job.
#[derive(Debug, Clone, Serialize)]
pub struct CloneOutcome {
    pub job_id: Uuid,
    pub new_root_id: Uuid,
    pub membership_id: Uuid,
    /// Documents per collection, in clone order.
    pub counts: Vec<CollectionCount>,
    /// Whether the job finished through `resume`.
    pub resumed: bool,
    pub duration_ms: u64,
}

impl CloneOutcome {
    /// Documents cloned in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.counts
            .iter()
            .find(|c| c.collection == collection)
            .map_or(0, |c| c.count)
    }

    /// Documents cloned in every collection, the root excluded.
    pub fn total_documents(&self) -> usize {
        self.counts.iter().map(|c| c.count).sum()
    }
}

struct Completion {
    new_root_id: Uuid,
    membership_id: Uuid,
}

/// Entry point of the clone engine.
#[derive(Clone)]
pub struct CloneOrchestrator {
    store: Arc<dyn DocumentStore>,
    schema: Arc<CloneSchema>,
    config: CloneConfig,
    guard: DuplicateGuard,
    reader: SourceGraphReader,
    cloner: CollectionCloner,
    membership: MembershipProvisioner,
    checkpoints: Option<Arc<dyn CheckpointRepository>>,
    events: Option<Arc<EventBus>>,
}

impl CloneOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, schema: CloneSchema, config: CloneConfig) -> Self {
        Self {
            guard: DuplicateGuard::new(store.clone(), schema.root_collection()),
            reader: SourceGraphReader::new(store.clone()),
            cloner: CollectionCloner::new(store.clone(), config.batch_size),
            membership: MembershipProvisioner::new(store.clone()),
            store,
            schema: Arc::new(schema),
            config,
            checkpoints: None,
            events: None,
        }
    }

    /// Attach checkpoint storage (used when `checkpoints_enabled` is set).
    pub fn with_checkpoints(mut self, repo: Arc<dyn CheckpointRepository>) -> Self {
        self.checkpoints = Some(repo);
        self
    }

    /// Attach the event bus that receives job lifecycle events.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &CloneConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<CloneSchema> {
        &self.schema
    }

    /// Clone the configured demo template for a new owner.
    pub async fn clone_template_for(
        &self,
        owner_id: Uuid,
        owner_namespace: Uuid,
    ) -> Result<CloneOutcome> {
        let Some(template_root_id) = self.config.template_root_id else {
            let err = CloneError::Config("DEMO_TEMPLATE_PROJECT_ID is not configured".into());
            error!(
                subsystem = "clone",
                component = "orchestrator",
                owner_id = %owner_id,
                error = %err,
                "Demo clone not attempted"
            );
            return Err(err);
        };
        self.clone_root(owner_id, owner_namespace, template_root_id)
            .await
    }

    /// Clone `source_root_id` and its dependents into `owner_namespace`.
    pub async fn clone_root(
        &self,
        owner_id: Uuid,
        owner_namespace: Uuid,
        source_root_id: Uuid,
    ) -> Result<CloneOutcome> {
        let start = Instant::now();
        let mut job = CloneJob::new(
            new_v7(),
            owner_id,
            owner_namespace,
            source_root_id,
            self.schema.len(),
        );
        let mut writer = None;
        let result = self.run_fresh(&mut job, &mut writer).await;
        self.finish(&mut job, writer, result, start, false).await
    }

    /// Continue a failed or interrupted job from its checkpoint.
    ///
    /// The duplicate guard is not consulted: the clone root already exists
    /// and belongs to this job. Instead the checkpoint is claimed before
    /// anything is written, so only one run can continue a job. A job still
    /// making progress within `resume_lease` is refused, as is one whose
    /// root already has its owner.
    pub async fn resume(&self, job_id: Uuid) -> Result<CloneOutcome> {
        let repo = self
            .checkpoint_repo()
            .ok_or_else(|| CloneError::Config("clone checkpoints are not enabled".into()))?;
        let stored = repo
            .load(job_id)
            .await
            .map_err(CloneError::Checkpoint)?
            .ok_or(CloneError::JobNotFound(job_id))?;

        let now = Utc::now();
        let idle = now
            .signed_duration_since(stored.updated_at_utc)
            .to_std()
            .unwrap_or_default();
        if stored.status == CheckpointStatus::InProgress && idle < self.config.resume_lease {
            warn!(
                subsystem = "clone",
                component = "orchestrator",
                op = "resume",
                job_id = %job_id,
                updated_at = %stored.updated_at_utc,
                "Refusing to resume a clone job that is still running"
            );
            return Err(CloneError::JobInProgress(job_id));
        }

        if self
            .membership
            .owner_membership(stored.new_root_id, stored.owner_id)
            .await
            .map_err(CloneError::SourceUnavailable)?
            .is_some()
        {
            // Ownership is the last step, so the checkpoint outlived its job.
            info!(
                subsystem = "clone",
                component = "orchestrator",
                op = "resume",
                job_id = %job_id,
                new_root_id = %stored.new_root_id,
                "Discarding checkpoint of an owned clone root"
            );
            repo.delete(job_id).await.map_err(CloneError::Checkpoint)?;
            return Err(CloneError::JobNotFound(job_id));
        }

        let checkpoint = repo
            .claim(job_id, stored.version, now)
            .await
            .map_err(CloneError::Checkpoint)?
            .ok_or(CloneError::JobClaimed(job_id))?;

        let start = Instant::now();
        let mut job = CloneJob::resumed(&checkpoint, self.schema.len());
        let mut identity = IdentityMapper::from_snapshot(checkpoint.identity.clone());

        info!(
            subsystem = "clone",
            component = "orchestrator",
            op = "resume",
            job_id = %job_id,
            new_root_id = %checkpoint.new_root_id,
            completed = checkpoint.completed_collections.len(),
            "Resuming clone job"
        );
        self.emit(CloneEvent::CloneStarted {
            job_id,
            owner_id: job.owner_id,
            source_root_id: job.source_root_id,
        });

        let new_root_id = checkpoint.new_root_id;
        let mut writer = CheckpointWriter::from_checkpoint(Some(repo), checkpoint);
        let result = self
            .run_collections(&mut job, new_root_id, &mut identity, &mut writer, Utc::now())
            .await;
        self.finish(&mut job, Some(writer), result, start, true).await
    }

    /// Checkpoints of jobs that did not complete, oldest first.
    pub async fn list_incomplete(&self) -> Result<Vec<CloneCheckpoint>> {
        match self.checkpoint_repo() {
            Some(repo) => repo.list().await.map_err(CloneError::Checkpoint),
            None => Ok(Vec::new()),
        }
    }

    /// Grant ownership of an orphaned clone root to the owner recorded on it.
    pub async fn reprovision_owner(&self, root_id: Uuid) -> Result<Uuid> {
        let root = self
            .store
            .get_document(self.schema.root_collection(), root_id)
            .await
            .map_err(CloneError::SourceUnavailable)?
            .filter(|d| d.has_flag(FIELD_IS_DEMO_CLONE, true))
            .ok_or(CloneError::RootNotFound(root_id))?;
        let owner_id = root.uuid_field(FIELD_OWNER_ID).ok_or_else(|| {
            CloneError::MembershipProvisioningFailure {
                new_root_id: root_id,
                source: callsheet_core::Error::InvalidInput(format!(
                    "clone root {} records no owner",
                    root_id
                )),
            }
        })?;
        self.membership.provision_owner(root_id, owner_id).await
    }

    async fn run_fresh(
        &self,
        job: &mut CloneJob,
        writer: &mut Option<CheckpointWriter>,
    ) -> Result<Completion> {
        if let Some(existing_root_id) = self.guard.existing_clone(job.owner_namespace).await? {
            return Err(CloneError::DuplicateExists {
                owner_namespace: job.owner_namespace,
                existing_root_id,
            });
        }
        job.transition(CloneState::DuplicateChecked)?;

        let source_root = self
            .reader
            .read_root(self.schema.root_collection(), job.source_root_id)
            .await?;
        self.emit(CloneEvent::CloneStarted {
            job_id: job.job_id,
            owner_id: job.owner_id,
            source_root_id: job.source_root_id,
        });

        let cloned_at = Utc::now();
        let new_root_id = self.create_root(&source_root, job, cloned_at).await?;
        job.new_root_id = Some(new_root_id);
        job.transition(CloneState::Cloning { index: 0 })?;

        let mut identity = IdentityMapper::new();
        identity.reserve([source_root.id]);
        identity.record(self.schema.root_collection(), source_root.id, new_root_id)?;

        let writer = writer.insert(CheckpointWriter::new(
            self.checkpoint_repo(),
            job,
            new_root_id,
            &identity,
        ));
        writer.save().await?;

        self.run_collections(job, new_root_id, &mut identity, writer, cloned_at)
            .await
    }

    async fn create_root(
        &self,
        source: &Document,
        job: &CloneJob,
        cloned_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let mut data = source.data.clone();
        strip_system_fields(&mut data);
        stamp_ownership(&mut data, job.owner_id, cloned_at);
        data.insert(FIELD_IS_DEMO_CLONE.to_string(), JsonValue::Bool(true));
        data.insert(
            FIELD_CLONED_FROM.to_string(),
            JsonValue::String(source.id.to_string()),
        );

        let new_root_id = self
            .store
            .create_document(
                self.schema.root_collection(),
                NewDocument::new(Some(job.owner_namespace), data),
            )
            .await
            .map_err(CloneError::RootCreationFailure)?;

        debug!(
            subsystem = "clone",
            component = "orchestrator",
            op = "create_root",
            job_id = %job.job_id,
            new_root_id = %new_root_id,
            "Clone root created"
        );
        Ok(new_root_id)
    }

    async fn run_collections(
        &self,
        job: &mut CloneJob,
        new_root_id: Uuid,
        identity: &mut IdentityMapper,
        writer: &mut CheckpointWriter,
        cloned_at: DateTime<Utc>,
    ) -> Result<Completion> {
        let target = CloneTarget {
            source_root_id: job.source_root_id,
            new_root_id,
            owner_id: job.owner_id,
            cloned_at,
        };

        for (index, entry) in self.schema.clone_order().enumerate() {
            if index > 0 {
                job.transition(CloneState::Cloning { index })?;
            }
            if writer.is_completed(&entry.name) {
                continue;
            }

            let report = self
                .cloner
                .clone_collection(entry, &target, identity, writer)
                .await?;
            job.record_count(&entry.name, report.count());
            writer.collection_completed(&report, identity).await?;
            self.emit(CloneEvent::CollectionCloned {
                job_id: job.job_id,
                collection: entry.name.clone(),
                count: report.count(),
            });
        }

        let membership_id = self
            .membership
            .provision_owner(new_root_id, job.owner_id)
            .await?;
        job.transition(CloneState::MembershipProvisioned)?;

        Ok(Completion {
            new_root_id,
            membership_id,
        })
    }

    async fn finish(
        &self,
        job: &mut CloneJob,
        writer: Option<CheckpointWriter>,
        result: Result<Completion>,
        start: Instant,
        resumed: bool,
    ) -> Result<CloneOutcome> {
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = result.and_then(|done| {
            job.transition(CloneState::Completed)?;
            Ok(done)
        });

        match result {
            Ok(done) => {
                if let Some(writer) = writer {
                    writer.remove().await;
                }
                info!(
                    subsystem = "clone",
                    component = "orchestrator",
                    op = "clone",
                    job_id = %job.job_id,
                    owner_id = %job.owner_id,
                    source_root_id = %job.source_root_id,
                    new_root_id = %done.new_root_id,
                    doc_count = job.total_documents(),
                    resumed,
                    duration_ms,
                    "Demo clone completed"
                );
                self.emit(CloneEvent::CloneCompleted {
                    job_id: job.job_id,
                    new_root_id: done.new_root_id,
                    documents: job.total_documents(),
                    duration_ms,
                });
                Ok(CloneOutcome {
                    job_id: job.job_id,
                    new_root_id: done.new_root_id,
                    membership_id: done.membership_id,
                    counts: self.ordered_counts(job),
                    resumed,
                    duration_ms,
                })
            }
            Err(e) if e.is_noop() => {
                job.fail(&e);
                info!(
                    subsystem = "clone",
                    component = "orchestrator",
                    op = "clone",
                    job_id = %job.job_id,
                    owner_id = %job.owner_id,
                    owner_namespace = %job.owner_namespace,
                    "Demo clone skipped, namespace already has one"
                );
                self.emit(CloneEvent::CloneSkipped {
                    job_id: job.job_id,
                    owner_namespace: job.owner_namespace,
                });
                Err(e)
            }
            Err(e) => {
                job.fail(&e);
                // Any failure after root creation leaves a root nobody owns.
                let orphaned = job.new_root_id.is_some();
                error!(
                    subsystem = "clone",
                    component = "orchestrator",
                    op = "clone",
                    job_id = %job.job_id,
                    owner_id = %job.owner_id,
                    source_root_id = %job.source_root_id,
                    new_root_id = ?job.new_root_id,
                    collection = e.collection(),
                    error_kind = e.kind(),
                    orphaned,
                    resumable = writer.as_ref().is_some_and(CheckpointWriter::is_enabled),
                    error = %e,
                    "Demo clone failed"
                );
                if let Some(mut writer) = writer {
                    writer.record_failure(&e).await;
                }
                self.emit(CloneEvent::CloneFailed {
                    job_id: job.job_id,
                    new_root_id: job.new_root_id,
                    error_kind: e.kind().to_string(),
                    error: e.to_string(),
                    orphaned,
                });
                Err(e)
            }
        }
    }

    fn ordered_counts(&self, job: &CloneJob) -> Vec<CollectionCount> {
        self.schema
            .clone_order()
            .map(|entry| CollectionCount {
                collection: entry.name.clone(),
                count: job
                    .counts
                    .iter()
                    .find(|c| c.collection == entry.name)
                    .map_or(0, |c| c.count),
            })
            .collect()
    }

    fn checkpoint_repo(&self) -> Option<Arc<dyn CheckpointRepository>> {
        if self.config.checkpoints_enabled {
            self.checkpoints.clone()
        } else {
            None
        }
    }

    fn emit(&self, event: CloneEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

/// Tracks and persists the checkpoint of one running job.
///
/// With no repository attached every persistence call is a no-op.
struct CheckpointWriter {
    repo: Option<Arc<dyn CheckpointRepository>>,
    checkpoint: CloneCheckpoint,
    completed: HashSet<String>,
}

impl CheckpointWriter {
    fn new(
        repo: Option<Arc<dyn CheckpointRepository>>,
        job: &CloneJob,
        new_root_id: Uuid,
        identity: &IdentityMapper,
    ) -> Self {
        Self::from_checkpoint(
            repo,
            CloneCheckpoint {
                job_id: job.job_id,
                owner_id: job.owner_id,
                owner_namespace: job.owner_namespace,
                source_root_id: job.source_root_id,
                new_root_id,
                status: CheckpointStatus::InProgress,
                completed_collections: Vec::new(),
                identity: identity.snapshot(),
                counts: Vec::new(),
                last_error: None,
                updated_at_utc: Utc::now(),
                version: 0,
                claimed_at_utc: None,
            },
        )
    }

    fn from_checkpoint(repo: Option<Arc<dyn CheckpointRepository>>, mut checkpoint: CloneCheckpoint) -> Self {
        checkpoint.status = CheckpointStatus::InProgress;
        checkpoint.last_error = None;
        let completed = checkpoint.completed_collections.iter().cloned().collect();
        Self {
            repo,
            checkpoint,
            completed,
        }
    }

    fn is_enabled(&self) -> bool {
        self.repo.is_some()
    }

    fn is_completed(&self, collection: &str) -> bool {
        self.completed.contains(collection)
    }

    fn set_count(&mut self, collection: &str, count: usize) {
        let counts = &mut self.checkpoint.counts;
        match counts.iter_mut().find(|c| c.collection == collection) {
            Some(existing) => existing.count = count,
            None => counts.push(CollectionCount {
                collection: collection.to_string(),
                count,
            }),
        }
    }

    async fn save(&mut self) -> Result<()> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };
        self.checkpoint.updated_at_utc = Utc::now();
        let saved = repo
            .save(&self.checkpoint)
            .await
            .map_err(CloneError::Checkpoint)?;
        if !saved {
            return Err(CloneError::JobClaimed(self.checkpoint.job_id));
        }
        self.checkpoint.version += 1;
        Ok(())
    }

    async fn collection_completed(
        &mut self,
        report: &CollectionReport,
        identity: &IdentityMapper,
    ) -> Result<()> {
        self.completed.insert(report.collection.clone());
        self.checkpoint
            .completed_collections
            .push(report.collection.clone());
        self.set_count(&report.collection, report.count());
        if self.is_enabled() {
            self.checkpoint.identity = identity.snapshot();
        }
        self.save().await
    }

    async fn record_failure(&mut self, error: &CloneError) {
        // A claimed job's checkpoint belongs to the run that claimed it.
        if !self.is_enabled() || matches!(error, CloneError::JobClaimed(_)) {
            return;
        }
        self.checkpoint.status = CheckpointStatus::Failed;
        self.checkpoint.last_error = Some(error.to_string());
        if let Err(e) = self.save().await {
            warn!(
                subsystem = "clone",
                component = "checkpoint",
                job_id = %self.checkpoint.job_id,
                error = %e,
                "Failed to record clone failure in checkpoint"
            );
        }
    }

    async fn remove(&self) {
        let Some(repo) = &self.repo else {
            return;
        };
        if let Err(e) = repo.delete(self.checkpoint.job_id).await {
            warn!(
                subsystem = "clone",
                component = "checkpoint",
                job_id = %self.checkpoint.job_id,
                error = %e,
                "Failed to delete checkpoint of completed clone"
            );
        }
    }
}

#[async_trait]
impl BatchObserver for CheckpointWriter {
    async fn batch_committed(
        &mut self,
        collection: &str,
        cloned: usize,
        identity: &IdentityMapper,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.set_count(collection, cloned);
        self.checkpoint.identity = identity.snapshot();
        self.save().await
    }
}
