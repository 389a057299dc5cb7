//! Clone checkpoint repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use callsheet_core::{
    CheckpointRepository, CheckpointStatus, CloneCheckpoint, CollectionCount, Error,
    IdentitySnapshot, Result,
};

const CHECKPOINT_COLUMNS: &str = "job_id, owner_id, owner_namespace, source_root_id, new_root_id, \
     status, completed_collections, identity, counts, last_error, updated_at_utc, version, \
     claimed_at_utc";

/// PostgreSQL implementation of CheckpointRepository.
#[derive(Clone)]
pub struct PgCheckpointRepository {
    pool: Pool<Postgres>,
}

impl PgCheckpointRepository {
    /// Create a new PgCheckpointRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_checkpoint(row: &PgRow) -> Result<CloneCheckpoint> {
    let status: String = row.try_get("status")?;
    let identity: JsonValue = row.try_get("identity")?;
    let counts: JsonValue = row.try_get("counts")?;

    Ok(CloneCheckpoint {
        job_id: row.try_get("job_id")?,
        owner_id: row.try_get("owner_id")?,
        owner_namespace: row.try_get("owner_namespace")?,
        source_root_id: row.try_get("source_root_id")?,
        new_root_id: row.try_get("new_root_id")?,
        status: status.parse::<CheckpointStatus>().map_err(Error::Serialization)?,
        completed_collections: row.try_get("completed_collections")?,
        identity: serde_json::from_value::<IdentitySnapshot>(identity)?,
        counts: serde_json::from_value::<Vec<CollectionCount>>(counts)?,
        last_error: row.try_get("last_error")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
        version: row.try_get("version")?,
        claimed_at_utc: row.try_get("claimed_at_utc")?,
    })
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn save(&self, checkpoint: &CloneCheckpoint) -> Result<bool> {
        let identity = serde_json::to_value(&checkpoint.identity)?;
        let counts = serde_json::to_value(&checkpoint.counts)?;

        // Version 0 may only create the row; later versions only advance it.
        let sql = if checkpoint.version == 0 {
            r#"
            INSERT INTO clone_checkpoint (
                job_id, owner_id, owner_namespace, source_root_id, new_root_id,
                status, completed_collections, identity, counts, last_error, updated_at_utc,
                version, claimed_at_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12 + 1, $13)
            ON CONFLICT (job_id) DO NOTHING
            "#
        } else {
            r#"
            UPDATE clone_checkpoint SET
                status = $6,
                completed_collections = $7,
                identity = $8,
                counts = $9,
                last_error = $10,
                updated_at_utc = $11,
                version = $12 + 1,
                claimed_at_utc = $13
            WHERE job_id = $1
              AND version = $12
              AND owner_id = $2 AND owner_namespace = $3
              AND source_root_id = $4 AND new_root_id = $5
            "#
        };

        let result = sqlx::query(sql)
            .bind(checkpoint.job_id)
            .bind(checkpoint.owner_id)
            .bind(checkpoint.owner_namespace)
            .bind(checkpoint.source_root_id)
            .bind(checkpoint.new_root_id)
            .bind(checkpoint.status.as_str())
            .bind(&checkpoint.completed_collections)
            .bind(identity)
            .bind(counts)
            .bind(&checkpoint.last_error)
            .bind(checkpoint.updated_at_utc)
            .bind(checkpoint.version)
            .bind(checkpoint.claimed_at_utc)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim(
        &self,
        job_id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<CloneCheckpoint>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE clone_checkpoint SET
                status = 'in_progress',
                last_error = NULL,
                claimed_at_utc = $3,
                updated_at_utc = $3,
                version = version + 1
            WHERE job_id = $1 AND version = $2
            RETURNING {CHECKPOINT_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(expected_version)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<CloneCheckpoint>> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM clone_checkpoint WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM clone_checkpoint WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CloneCheckpoint>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM clone_checkpoint ORDER BY updated_at_utc, job_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn exists_for_root(&self, new_root_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM clone_checkpoint WHERE new_root_id = $1)",
        )
        .bind(new_root_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }
}
