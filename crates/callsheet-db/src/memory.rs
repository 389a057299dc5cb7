//! In-memory storage backends.
//!
//! [`MemoryDocumentStore`] and [`MemoryCheckpointRepository`] implement the
//! same traits as the PostgreSQL repositories. They back `STORE_BACKEND=memory`
//! and every hermetic test, so they support fault injection: reads, creates,
//! individual batches and flag queries can be made to fail on demand.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use callsheet_core::{
    defaults::STORE_MAX_BATCH_SIZE, new_v7, CheckpointRepository, CheckpointStatus, CloneCheckpoint,
    Document,
    DocumentStore, Error, Fields, MaintenanceStore, NewDocument, Result, WriteOp,
};

#[derive(Debug, Default)]
struct Faults {
    reads: HashSet<String>,
    creates: HashSet<String>,
    batches: HashSet<(String, usize)>,
    flag_queries: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<Uuid, Document>>,
    faults: Faults,
    /// Batches attempted per collection, keyed by the first op's collection.
    batches_seen: HashMap<String, usize>,
    /// Documents written through the trait (seeding is not counted).
    write_count: usize,
    reverse_reads: bool,
}

/// Document store held entirely in process memory.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    state: RwLock<MemoryState>,
    max_batch_size: usize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            max_batch_size: STORE_MAX_BATCH_SIZE,
        }
    }

    /// Override the per-batch operation ceiling.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    /// Insert a document directly, bypassing write accounting and faults.
    pub async fn insert(&self, collection: &str, parent_id: Option<Uuid>, data: Fields) -> Uuid {
        let id = new_v7();
        self.insert_with_id(collection, id, parent_id, data).await;
        id
    }

    /// Insert a document under a caller-chosen id.
    pub async fn insert_with_id(
        &self,
        collection: &str,
        id: Uuid,
        parent_id: Option<Uuid>,
        data: Fields,
    ) {
        let doc = Document {
            id,
            collection: collection.to_string(),
            parent_id,
            data,
            created_at_utc: Utc::now(),
        };
        self.state
            .write()
            .await
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc);
    }

    /// Number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Every document of `collection`, in id order.
    pub async fn all(&self, collection: &str) -> Vec<Document> {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch one document.
    pub async fn get(&self, collection: &str, id: Uuid) -> Option<Document> {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|docs| docs.get(&id).cloned())
    }

    /// Documents written through the store trait so far.
    pub async fn write_count(&self) -> usize {
        self.state.read().await.write_count
    }

    /// Make every read of `collection` fail.
    pub async fn fail_reads(&self, collection: &str) {
        self.state
            .write()
            .await
            .faults
            .reads
            .insert(collection.to_string());
    }

    /// Make single-document creates into `collection` fail.
    pub async fn fail_creates(&self, collection: &str) {
        self.state
            .write()
            .await
            .faults
            .creates
            .insert(collection.to_string());
    }

    /// Make the `batch_index`-th batch (0-based) written to `collection` fail.
    ///
    /// Batches are counted from the moment the store was created or faults
    /// were last cleared.
    pub async fn fail_batch(&self, collection: &str, batch_index: usize) {
        self.state
            .write()
            .await
            .faults
            .batches
            .insert((collection.to_string(), batch_index));
    }

    /// Make every flag query fail.
    pub async fn fail_flag_queries(&self) {
        self.state.write().await.faults.flag_queries = true;
    }

    /// Return parent reads in descending id order instead of ascending.
    pub async fn reverse_reads(&self, reverse: bool) {
        self.state.write().await.reverse_reads = reverse;
    }

    /// Remove every injected fault and reset batch counters.
    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.faults = Faults::default();
        state.batches_seen.clear();
    }
}

fn injected(what: &str, collection: &str) -> Error {
    Error::Store(format!("injected {} failure on '{}'", what, collection))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        if state.faults.reads.contains(collection) {
            return Err(injected("read", collection));
        }
        let mut docs: Vec<Document> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| d.parent_id == Some(parent_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if state.reverse_reads {
            docs.reverse();
        }
        Ok(docs)
    }

    async fn get_document(&self, collection: &str, id: Uuid) -> Result<Option<Document>> {
        Ok(self.get(collection, id).await)
    }

    async fn create_document(&self, collection: &str, doc: NewDocument) -> Result<Uuid> {
        let mut state = self.state.write().await;
        if state.faults.creates.contains(collection) {
            return Err(injected("create", collection));
        }
        let id = new_v7();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(
                id,
                Document {
                    id,
                    collection: collection.to_string(),
                    parent_id: doc.parent_id,
                    data: doc.data,
                    created_at_utc: Utc::now(),
                },
            );
        state.write_count += 1;
        Ok(id)
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.len() > self.max_batch_size {
            return Err(Error::InvalidInput(format!(
                "batch of {} operations exceeds the limit of {}",
                ops.len(),
                self.max_batch_size
            )));
        }
        let Some(first) = ops.first() else {
            return Ok(());
        };

        let mut state = self.state.write().await;
        let collection = first.collection().to_string();
        let batch_index = {
            let seen = state.batches_seen.entry(collection.clone()).or_insert(0);
            let index = *seen;
            *seen += 1;
            index
        };
        if state.faults.batches.contains(&(collection.clone(), batch_index)) {
            return Err(injected("batch", &collection));
        }

        // Validate the whole batch before applying any of it.
        let mut ids = HashSet::with_capacity(ops.len());
        for op in &ops {
            let exists = state
                .collections
                .get(op.collection())
                .is_some_and(|docs| docs.contains_key(&op.id()));
            if exists || !ids.insert((op.collection().to_string(), op.id())) {
                return Err(Error::Store(format!(
                    "document {} already exists in '{}'",
                    op.id(),
                    op.collection()
                )));
            }
        }

        let now = Utc::now();
        let written = ops.len();
        for op in ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    parent_id,
                    data,
                } => {
                    state.collections.entry(collection.clone()).or_default().insert(
                        id,
                        Document {
                            id,
                            collection,
                            parent_id,
                            data,
                            created_at_utc: now,
                        },
                    );
                }
            }
        }
        state.write_count += written;

        trace!(
            subsystem = "db",
            component = "memory",
            op = "batch_write",
            collection = %collection,
            batch_index,
            batch_size = written,
            "Applied in-memory batch"
        );
        Ok(())
    }

    async fn query_by_flag(
        &self,
        collection: &str,
        owner_scope: Uuid,
        flag_field: &str,
        flag_value: bool,
    ) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        if state.faults.flag_queries {
            return Err(injected("flag query", collection));
        }
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| d.parent_id == Some(owner_scope) && d.has_flag(flag_field, flag_value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl MaintenanceStore for MemoryDocumentStore {
    async fn list_flagged(
        &self,
        collection: &str,
        flag_field: &str,
        flag_value: bool,
    ) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| d.has_flag(flag_field, flag_value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, d| d.parent_id != Some(parent_id));
        Ok((before - docs.len()) as u64)
    }

    async fn delete_document(&self, collection: &str, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(&id))
            .is_some())
    }
}

/// Checkpoint repository held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointRepository {
    checkpoints: RwLock<HashMap<Uuid, CloneCheckpoint>>,
    fail_saves: AtomicBool,
}

impl MemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of stored checkpoints.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointRepository for MemoryCheckpointRepository {
    async fn save(&self, checkpoint: &CloneCheckpoint) -> Result<bool> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Store("injected checkpoint save failure".to_string()));
        }
        let mut checkpoints = self.checkpoints.write().await;
        let current = checkpoints.get(&checkpoint.job_id).map(|c| c.version);
        let accepted = match current {
            None => checkpoint.version == 0,
            Some(version) => version == checkpoint.version,
        };
        if accepted {
            let mut stored = checkpoint.clone();
            stored.version += 1;
            checkpoints.insert(stored.job_id, stored);
        }
        Ok(accepted)
    }

    async fn claim(
        &self,
        job_id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<CloneCheckpoint>> {
        let mut checkpoints = self.checkpoints.write().await;
        let Some(stored) = checkpoints
            .get_mut(&job_id)
            .filter(|c| c.version == expected_version)
        else {
            return Ok(None);
        };
        stored.status = CheckpointStatus::InProgress;
        stored.last_error = None;
        stored.claimed_at_utc = Some(now);
        stored.updated_at_utc = now;
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<CloneCheckpoint>> {
        Ok(self.checkpoints.read().await.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        self.checkpoints.write().await.remove(&job_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CloneCheckpoint>> {
        let mut all: Vec<CloneCheckpoint> =
            self.checkpoints.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.updated_at_utc
                .cmp(&b.updated_at_utc)
                .then(a.job_id.cmp(&b.job_id))
        });
        Ok(all)
    }

    async fn exists_for_root(&self, new_root_id: Uuid) -> Result<bool> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .any(|c| c.new_root_id == new_root_id))
    }
}
