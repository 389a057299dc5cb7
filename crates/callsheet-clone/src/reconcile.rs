//! Orphan reconciliation.
//!
//! A clone job that fails after writing its root leaves a clone nobody owns
//! (no `project_members` record). The reconciler finds such roots once they
//! are older than a grace period and have no resumable checkpoint, and
//! deletes them along with every dependent document.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use callsheet_core::{
    defaults::{MEMBERSHIP_COLLECTION, ORPHAN_GRACE_SECS, RECONCILE_INTERVAL_SECS},
    id_age, CheckpointRepository, CloneEvent, CloneSchema, Document, Error, EventBus,
    MaintenanceStore, FIELD_IS_DEMO_CLONE,
};

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Whether the periodic sweep runs at all.
    pub enabled: bool,
    /// Time between sweeps.
    pub interval: Duration,
    /// Roots younger than this are left alone (their job may still be running).
    pub grace_period: Duration,
    /// Report orphans without deleting them.
    pub dry_run: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(RECONCILE_INTERVAL_SECS),
            grace_period: Duration::from_secs(ORPHAN_GRACE_SECS),
            dry_run: false,
        }
    }
}

impl ReconcilerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CLONE_RECONCILE_ENABLED` | `false` | Run the periodic sweep |
    /// | `CLONE_RECONCILE_INTERVAL_SECS` | `3600` | Seconds between sweeps |
    /// | `CLONE_ORPHAN_GRACE_SECS` | `86400` | Minimum orphan age before deletion |
    /// | `CLONE_RECONCILE_DRY_RUN` | `false` | Report only |
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };
        let secs = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            enabled: flag("CLONE_RECONCILE_ENABLED"),
            interval: Duration::from_secs(
                secs("CLONE_RECONCILE_INTERVAL_SECS", RECONCILE_INTERVAL_SECS).max(1),
            ),
            grace_period: Duration::from_secs(secs("CLONE_ORPHAN_GRACE_SECS", ORPHAN_GRACE_SECS)),
            dry_run: flag("CLONE_RECONCILE_DRY_RUN"),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// One orphaned root found by a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweptRoot {
    pub root_id: Uuid,
    /// Documents deleted (or, in a dry run, that would be), the root included.
    pub documents: u64,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub owned: usize,
    pub skipped_recent: usize,
    pub skipped_checkpointed: usize,
    pub orphans: Vec<SweptRoot>,
    pub dry_run: bool,
}

/// Finds and deletes unowned clone roots.
#[derive(Clone)]
pub struct OrphanReconciler {
    store: Arc<dyn MaintenanceStore>,
    schema: Arc<CloneSchema>,
    checkpoints: Option<Arc<dyn CheckpointRepository>>,
    events: Option<Arc<EventBus>>,
    config: ReconcilerConfig,
}

/// Handle for controlling a running reconciler.
pub struct ReconcilerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcilerHandle {
    /// Signal the reconciler loop to stop.
    pub async fn shutdown(&self) -> callsheet_core::Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send reconciler shutdown signal".into()))
    }
}

impl OrphanReconciler {
    pub fn new(
        store: Arc<dyn MaintenanceStore>,
        schema: Arc<CloneSchema>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            schema,
            checkpoints: None,
            events: None,
            config,
        }
    }

    /// Roots with a checkpoint belong to a resumable job and are never swept.
    pub fn with_checkpoints(mut self, repo: Arc<dyn CheckpointRepository>) -> Self {
        self.checkpoints = Some(repo);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one sweep over every clone root.
    pub async fn sweep(&self) -> callsheet_core::Result<SweepReport> {
        let start = Instant::now();
        let root_collection = self.schema.root_collection();
        let roots = self
            .store
            .list_flagged(root_collection, FIELD_IS_DEMO_CLONE, true)
            .await?;

        let mut report = SweepReport {
            dry_run: self.config.dry_run,
            ..SweepReport::default()
        };
        let now = Utc::now();

        for root in roots {
            report.examined += 1;

            if id_age(&root.id, root.created_at_utc, now) < self.config.grace_period {
                report.skipped_recent += 1;
                continue;
            }
            if let Some(repo) = &self.checkpoints {
                if repo.exists_for_root(root.id).await? {
                    report.skipped_checkpointed += 1;
                    continue;
                }
            }
            if !self
                .store
                .read_by_parent(MEMBERSHIP_COLLECTION, root.id)
                .await?
                .is_empty()
            {
                report.owned += 1;
                continue;
            }

            let documents = if self.config.dry_run {
                self.count_graph(&root).await?
            } else {
                self.delete_graph(&root).await?
            };
            warn!(
                subsystem = "clone",
                component = "reconciler",
                op = "sweep",
                root_id = %root.id,
                doc_count = documents,
                dry_run = self.config.dry_run,
                orphaned = true,
                "Unowned clone root found"
            );
            if !self.config.dry_run {
                if let Some(events) = &self.events {
                    events.emit(CloneEvent::OrphanSwept {
                        root_id: root.id,
                        documents,
                    });
                }
            }
            report.orphans.push(SweptRoot {
                root_id: root.id,
                documents,
            });
        }

        info!(
            subsystem = "clone",
            component = "reconciler",
            op = "sweep",
            examined = report.examined,
            orphans = report.orphans.len(),
            skipped_recent = report.skipped_recent,
            skipped_checkpointed = report.skipped_checkpointed,
            dry_run = report.dry_run,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orphan sweep finished"
        );
        Ok(report)
    }

    async fn count_graph(&self, root: &Document) -> callsheet_core::Result<u64> {
        let mut total = 1;
        for entry in self.schema.clone_order() {
            total += self.store.read_by_parent(&entry.name, root.id).await?.len() as u64;
        }
        Ok(total)
    }

    /// Dependents first (reverse clone order), then the root.
    async fn delete_graph(&self, root: &Document) -> callsheet_core::Result<u64> {
        let mut total = 0;
        for entry in self.schema.clone_order().rev() {
            let deleted = self.store.delete_by_parent(&entry.name, root.id).await?;
            debug!(
                subsystem = "clone",
                component = "reconciler",
                op = "delete_by_parent",
                collection = %entry.name,
                root_id = %root.id,
                doc_count = deleted,
                "Deleted orphaned dependents"
            );
            total += deleted;
        }
        if self
            .store
            .delete_document(self.schema.root_collection(), root.id)
            .await?
        {
            total += 1;
        }
        Ok(total)
    }

    /// Start the periodic sweep loop and return a handle for control.
    pub fn start(self) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        ReconcilerHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(
                subsystem = "clone",
                component = "reconciler",
                "Orphan reconciler is disabled, not starting"
            );
            return;
        }

        info!(
            subsystem = "clone",
            component = "reconciler",
            interval_secs = self.config.interval.as_secs(),
            grace_secs = self.config.grace_period.as_secs(),
            dry_run = self.config.dry_run,
            "Orphan reconciler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(
                        subsystem = "clone",
                        component = "reconciler",
                        "Orphan reconciler received shutdown signal"
                    );
                    break;
                }
                _ = sleep(self.config.interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(
                            subsystem = "clone",
                            component = "reconciler",
                            op = "sweep",
                            error = %e,
                            "Orphan sweep failed"
                        );
                    }
                }
            }
        }
    }
}
