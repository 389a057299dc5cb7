//! Source graph reads.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use callsheet_core::{Document, DocumentStore, Error};

use crate::error::{CloneError, Result};

/// Reads the documents of a source root, one collection at a time.
///
/// Reads of different collections are independent; nothing guarantees they
/// observe the same snapshot of the source.
#[derive(Clone)]
pub struct SourceGraphReader {
    store: Arc<dyn DocumentStore>,
}

impl SourceGraphReader {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Every document of `collection` under `source_root_id`, ascending by id.
    pub async fn read_collection(
        &self,
        collection: &str,
        source_root_id: Uuid,
    ) -> Result<Vec<Document>> {
        let mut docs = self
            .store
            .read_by_parent(collection, source_root_id)
            .await
            .map_err(|source| CloneError::CollectionReadFailure {
                collection: collection.to_string(),
                source,
            })?;
        docs.sort_by_key(|d| d.id);

        debug!(
            subsystem = "clone",
            component = "reader",
            op = "read_collection",
            collection,
            source_root_id = %source_root_id,
            doc_count = docs.len(),
            "Read source collection"
        );
        Ok(docs)
    }

    /// The source root itself.
    pub async fn read_root(&self, root_collection: &str, source_root_id: Uuid) -> Result<Document> {
        self.store
            .get_document(root_collection, source_root_id)
            .await
            .map_err(CloneError::SourceUnavailable)?
            .ok_or_else(|| {
                CloneError::SourceUnavailable(Error::DocumentNotFound {
                    collection: root_collection.to_string(),
                    id: source_root_id,
                })
            })
    }
}
