//! PostgreSQL document store.
//!
//! Every collection shares the `document` table; the body is JSONB and the
//! parent link is a first-class column so parent reads hit
//! `idx_document_collection_parent`.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use callsheet_core::{
    defaults::STORE_MAX_BATCH_SIZE, new_v7, Document, DocumentStore, Error, MaintenanceStore,
    NewDocument, Result, WriteOp,
};

const DOCUMENT_COLUMNS: &str = "id, collection, parent_id, data, created_at_utc";

/// PostgreSQL implementation of DocumentStore and MaintenanceStore.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool<Postgres>,
    max_batch_size: usize,
}

impl PgDocumentStore {
    /// Create a new PgDocumentStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            max_batch_size: STORE_MAX_BATCH_SIZE,
        }
    }

    /// Override the per-batch operation ceiling.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }
}

fn row_to_document(row: &PgRow) -> Result<Document> {
    let data = match row.try_get::<JsonValue, _>("data")? {
        JsonValue::Object(map) => map,
        other => {
            return Err(Error::Serialization(format!(
                "document body must be a JSON object, got {}",
                other
            )))
        }
    };
    Ok(Document {
        id: row.try_get("id")?,
        collection: row.try_get("collection")?,
        parent_id: row.try_get("parent_id")?,
        data,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn rows_to_documents(rows: Vec<PgRow>) -> Result<Vec<Document>> {
    rows.iter().map(row_to_document).collect()
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn read_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE collection = $1 AND parent_id = $2
             ORDER BY id"
        ))
        .bind(collection)
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "documents",
            op = "read_by_parent",
            collection,
            doc_count = rows.len(),
            "Read documents by parent"
        );
        rows_to_documents(rows)
    }

    async fn get_document(&self, collection: &str, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE collection = $1 AND id = $2"
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn create_document(&self, collection: &str, doc: NewDocument) -> Result<Uuid> {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO document (id, collection, parent_id, data, created_at_utc)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(collection)
        .bind(doc.parent_id)
        .bind(JsonValue::Object(doc.data))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

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
        if ops.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let batch_size = ops.len();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for op in ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    parent_id,
                    data,
                } => {
                    sqlx::query(
                        "INSERT INTO document (id, collection, parent_id, data, created_at_utc)
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(id)
                    .bind(&collection)
                    .bind(parent_id)
                    .bind(JsonValue::Object(data))
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                }
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "batch_write",
            batch_size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Committed write batch"
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
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE collection = $1
               AND parent_id = $2
               AND data @> jsonb_build_object($3::text, $4::boolean)
             ORDER BY id"
        ))
        .bind(collection)
        .bind(owner_scope)
        .bind(flag_field)
        .bind(flag_value)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows_to_documents(rows)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl MaintenanceStore for PgDocumentStore {
    async fn list_flagged(
        &self,
        collection: &str,
        flag_field: &str,
        flag_value: bool,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE collection = $1
               AND data @> jsonb_build_object($2::text, $3::boolean)
             ORDER BY id"
        ))
        .bind(collection)
        .bind(flag_field)
        .bind(flag_value)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows_to_documents(rows)
    }

    async fn delete_by_parent(&self, collection: &str, parent_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document WHERE collection = $1 AND parent_id = $2")
            .bind(collection)
            .bind(parent_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_document(&self, collection: &str, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
