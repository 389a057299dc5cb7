//! Per-collection cloning: read, rewrite, allocate, write in batches.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use callsheet_core::{
    CollectionSchema, Document, DocumentStore, Fields, WriteOp, FIELD_CREATED_AT,
    FIELD_CREATED_BY, FIELD_OWNER_ID, FIELD_UPDATED_AT, FIELD_UPDATED_BY, SYSTEM_FIELDS,
};

use crate::error::{CloneError, Result};
use crate::identity::IdentityMapper;
use crate::reader::SourceGraphReader;
use crate::resolver::resolve_references;

/// Where a collection is cloned from and to.
#[derive(Debug, Clone, Copy)]
pub struct CloneTarget {
    pub source_root_id: Uuid,
    pub new_root_id: Uuid,
    pub owner_id: Uuid,
    pub cloned_at: DateTime<Utc>,
}

/// Notified after every committed batch.
#[async_trait]
pub trait BatchObserver: Send {
    /// `cloned` counts every document of `collection` now present in the clone.
    async fn batch_committed(
        &mut self,
        collection: &str,
        cloned: usize,
        identity: &IdentityMapper,
    ) -> Result<()>;
}

/// Observer that ignores every batch.
pub struct NoopObserver;

#[async_trait]
impl BatchObserver for NoopObserver {
    async fn batch_committed(&mut self, _: &str, _: usize, _: &IdentityMapper) -> Result<()> {
        Ok(())
    }
}

/// Outcome of cloning one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: String,
    /// Documents written by this run.
    pub written: usize,
    /// Documents already committed by an earlier run of the same job.
    pub resumed: usize,
    pub batches: usize,
}

impl CollectionReport {
    /// Documents of this collection present in the clone.
    pub fn count(&self) -> usize {
        self.written + self.resumed
    }
}

/// Clones one collection at a time into a new root.
#[derive(Clone)]
pub struct CollectionCloner {
    reader: SourceGraphReader,
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl CollectionCloner {
    /// `batch_size` is capped by the store's own batch limit.
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.min(store.max_batch_size()).max(1);
        Self {
            reader: SourceGraphReader::new(store.clone()),
            store,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Clone every source document of `entry` into `target.new_root_id`.
    ///
    /// Documents whose source id is already mapped were committed by an
    /// earlier run and are skipped. A failed batch aborts the collection;
    /// earlier batches stay committed.
    pub async fn clone_collection(
        &self,
        entry: &CollectionSchema,
        target: &CloneTarget,
        identity: &mut IdentityMapper,
        observer: &mut dyn BatchObserver,
    ) -> Result<CollectionReport> {
        let start = Instant::now();
        let collection = entry.name.as_str();

        let docs = self
            .reader
            .read_collection(collection, target.source_root_id)
            .await?;
        identity.reserve(docs.iter().map(|d| d.id));

        let pending: Vec<&Document> = docs
            .iter()
            .filter(|d| !identity.is_mapped(collection, d.id))
            .collect();
        let mut report = CollectionReport {
            collection: collection.to_string(),
            written: 0,
            resumed: docs.len() - pending.len(),
            batches: 0,
        };

        for (batch_index, chunk) in pending.chunks(self.batch_size).enumerate() {
            let mut ops = Vec::with_capacity(chunk.len());
            let mut allocated = Vec::with_capacity(chunk.len());
            for doc in chunk {
                let data = rewrite_body(doc.data.clone(), entry, identity, target);
                let new_id = match identity.allocate(collection, doc.id) {
                    Ok(id) => id,
                    Err(e) => {
                        identity.forget(collection, &allocated);
                        return Err(e);
                    }
                };
                allocated.push(doc.id);
                ops.push(WriteOp::Create {
                    collection: collection.to_string(),
                    id: new_id,
                    parent_id: Some(target.new_root_id),
                    data,
                });
            }

            if let Err(source) = self.store.batch_write(ops).await {
                identity.forget(collection, &allocated);
                warn!(
                    subsystem = "clone",
                    component = "cloner",
                    op = "batch_write",
                    collection,
                    batch_index,
                    batch_size = chunk.len(),
                    error = %source,
                    "Clone batch failed, remaining batches skipped"
                );
                return Err(CloneError::CollectionWriteFailure {
                    collection: collection.to_string(),
                    batch_index,
                    source,
                });
            }

            report.written += chunk.len();
            report.batches += 1;
            debug!(
                subsystem = "clone",
                component = "cloner",
                op = "batch_write",
                collection,
                batch_index,
                batch_size = chunk.len(),
                "Clone batch committed"
            );
            observer
                .batch_committed(collection, report.count(), identity)
                .await?;
        }

        debug!(
            subsystem = "clone",
            component = "cloner",
            op = "clone_collection",
            collection,
            doc_count = report.count(),
            resumed = report.resumed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Collection cloned"
        );
        Ok(report)
    }
}

/// Source body → clone body: system fields dropped, references remapped,
/// ownership reassigned.
fn rewrite_body(
    mut data: Fields,
    entry: &CollectionSchema,
    identity: &IdentityMapper,
    target: &CloneTarget,
) -> Fields {
    strip_system_fields(&mut data);
    let mut data = resolve_references(data, entry, identity);
    stamp_ownership(&mut data, target.owner_id, target.cloned_at);
    data
}

pub(crate) fn strip_system_fields(data: &mut Fields) {
    for field in SYSTEM_FIELDS {
        data.remove(*field);
    }
}

pub(crate) fn stamp_ownership(data: &mut Fields, owner_id: Uuid, at: DateTime<Utc>) {
    let owner = JsonValue::String(owner_id.to_string());
    let now = JsonValue::String(at.to_rfc3339_opts(SecondsFormat::Millis, true));
    data.insert(FIELD_OWNER_ID.to_string(), owner.clone());
    data.insert(FIELD_CREATED_BY.to_string(), owner.clone());
    data.insert(FIELD_UPDATED_BY.to_string(), owner);
    data.insert(FIELD_CREATED_AT.to_string(), now.clone());
    data.insert(FIELD_UPDATED_AT.to_string(), now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrite_body_replaces_system_fields() {
        let ids = IdentityMapper::new();
        let owner = Uuid::new_v4();
        let target = CloneTarget {
            source_root_id: Uuid::new_v4(),
            new_root_id: Uuid::new_v4(),
            owner_id: owner,
            cloned_at: Utc::now(),
        };
        let source = json!({
            "id": Uuid::new_v4().to_string(),
            "owner_id": "someone-else",
            "created_by": "someone-else",
            "created_at": "2020-01-01T00:00:00Z",
            "name": "Harbor Pier",
        });

        let out = rewrite_body(
            source.as_object().cloned().unwrap(),
            &CollectionSchema::new("locations"),
            &ids,
            &target,
        );

        assert!(out.get("id").is_none());
        assert_eq!(out["owner_id"], json!(owner.to_string()));
        assert_eq!(out["created_by"], json!(owner.to_string()));
        assert_eq!(out["updated_by"], json!(owner.to_string()));
        assert_ne!(out["created_at"], json!("2020-01-01T00:00:00Z"));
        assert_eq!(out["created_at"], out["updated_at"]);
        assert_eq!(out["name"], json!("Harbor Pier"));
    }
}
