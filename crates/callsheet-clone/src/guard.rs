//! Duplicate guard: at most one demo clone per owner namespace.

use std::sync::Arc;

use uuid::Uuid;

use callsheet_core::{DocumentStore, FIELD_IS_DEMO_CLONE};

use crate::error::{CloneError, Result};

/// Checks whether an owner namespace already holds a clone.
///
/// The check is a plain read with no reservation: two jobs racing for the
/// same namespace can both pass it.
#[derive(Clone)]
pub struct DuplicateGuard {
    store: Arc<dyn DocumentStore>,
    root_collection: String,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn DocumentStore>, root_collection: impl Into<String>) -> Self {
        Self {
            store,
            root_collection: root_collection.into(),
        }
    }

    pub async fn has_existing_clone(&self, owner_namespace: Uuid) -> Result<bool> {
        Ok(self.existing_clone(owner_namespace).await?.is_some())
    }

    /// Id of an existing clone root in the namespace, if any.
    pub async fn existing_clone(&self, owner_namespace: Uuid) -> Result<Option<Uuid>> {
        let hits = self
            .store
            .query_by_flag(&self.root_collection, owner_namespace, FIELD_IS_DEMO_CLONE, true)
            .await
            .map_err(CloneError::SourceUnavailable)?;
        Ok(hits.first().map(|d| d.id))
    }
}
