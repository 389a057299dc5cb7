//! Shared application state and store wiring.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use callsheet_clone::{CloneConfig, CloneOrchestrator, OrphanReconciler, ReconcilerConfig};
use callsheet_core::{
    new_v7, CheckpointRepository, CloneEvent, CloneSchema, DocumentStore, EventBus,
    MaintenanceStore,
};
use callsheet_db::{
    log_pool_metrics, seed_demo_template, Database, MemoryCheckpointRepository,
    MemoryDocumentStore, PoolConfig,
};

use crate::config::{ApiConfig, StoreBackend};

/// Store handles behind one backend.
#[derive(Clone)]
pub struct Backend {
    pub documents: Arc<dyn DocumentStore>,
    pub maintenance: Arc<dyn MaintenanceStore>,
    pub checkpoints: Arc<dyn CheckpointRepository>,
}

impl Backend {
    /// In-memory backend over the given store.
    pub fn memory(store: Arc<MemoryDocumentStore>) -> Self {
        Self {
            documents: store.clone(),
            maintenance: store,
            checkpoints: Arc::new(MemoryCheckpointRepository::new()),
        }
    }

    pub fn postgres(db: &Database) -> Self {
        let documents = Arc::new(db.documents.clone());
        Self {
            documents: documents.clone(),
            maintenance: documents,
            checkpoints: Arc::new(db.checkpoints.clone()),
        }
    }

    /// Connect to the configured backend.
    ///
    /// PostgreSQL is migrated on connect. The memory backend is seeded with
    /// a demo template when `clone_config` names none, and the seeded root
    /// becomes the template.
    pub async fn connect(
        config: &ApiConfig,
        clone_config: &mut CloneConfig,
    ) -> anyhow::Result<Self> {
        match config.backend {
            StoreBackend::Postgres => {
                info!("Connecting to database...");
                let db =
                    Database::connect_with_config(&config.database_url, PoolConfig::from_env())
                        .await?;
                log_pool_metrics(db.pool());
                info!("Database connected");

                info!("Running database migrations...");
                db.migrate().await?;
                info!("Database migrations complete");

                Ok(Self::postgres(&db))
            }
            StoreBackend::Memory => {
                let store = Arc::new(MemoryDocumentStore::new());
                if clone_config.template_root_id.is_none() {
                    let seeded = seed_demo_template(store.as_ref(), new_v7()).await?;
                    info!(
                        template_root_id = %seeded.root_id,
                        doc_count = seeded.total(),
                        "Seeded in-memory demo template"
                    );
                    clone_config.template_root_id = Some(seeded.root_id);
                }
                Ok(Self::memory(store))
            }
        }
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<dyn DocumentStore>,
    pub orchestrator: CloneOrchestrator,
    pub reconciler: OrphanReconciler,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        backend: Backend,
        schema: CloneSchema,
        clone_config: CloneConfig,
        reconciler_config: ReconcilerConfig,
        events: Arc<EventBus>,
        admin_token: Option<String>,
    ) -> Self {
        let orchestrator =
            CloneOrchestrator::new(backend.documents.clone(), schema, clone_config)
                .with_checkpoints(backend.checkpoints.clone())
                .with_events(events.clone());
        let reconciler = OrphanReconciler::new(
            backend.maintenance,
            orchestrator.schema().clone(),
            reconciler_config,
        )
        .with_checkpoints(backend.checkpoints)
        .with_events(events);

        Self {
            documents: backend.documents,
            orchestrator,
            reconciler,
            admin_token: admin_token.map(Arc::from),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.documents.backend_name()
    }
}

/// Spawn the consumer that writes every clone event to the log.
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => match &envelope.payload {
                    CloneEvent::CloneFailed {
                        error_kind,
                        orphaned,
                        ..
                    } => warn!(
                        subsystem = "events",
                        event_type = %envelope.event_type,
                        correlation_id = ?envelope.correlation_id,
                        error_kind = %error_kind,
                        orphaned,
                        "Clone event"
                    ),
                    CloneEvent::CollectionCloned { .. } => debug!(
                        subsystem = "events",
                        event_type = %envelope.event_type,
                        correlation_id = ?envelope.correlation_id,
                        "Clone event"
                    ),
                    _ => info!(
                        subsystem = "events",
                        event_type = %envelope.event_type,
                        correlation_id = ?envelope.correlation_id,
                        "Clone event"
                    ),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(subsystem = "events", missed, "Event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
