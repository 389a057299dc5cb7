//! # callsheet-db
//!
//! Storage backends for callsheet.
//!
//! This crate provides:
//! - Connection pool management
//! - A PostgreSQL/JSONB document store implementing `DocumentStore` and
//!   `MaintenanceStore`
//! - A PostgreSQL clone checkpoint repository
//! - In-memory implementations of the same traits, with fault injection
//! - Demo template seeding
//!
//! ## Example
//!
//! ```rust,ignore
//! use callsheet_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/callsheet").await?;
//!     db.migrate().await?;
//!     let docs = db.documents.read_by_parent("scenes", project_id).await?;
//!     Ok(())
//! }
//! ```
pub mod checkpoints;
pub mod documents;
pub mod memory;
pub mod pool;
pub mod seed;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use callsheet_core::*;

pub use checkpoints::PgCheckpointRepository;
pub use documents::PgDocumentStore;
pub use memory::{MemoryCheckpointRepository, MemoryDocumentStore};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use seed::{seed_demo_template, SeededTemplate, BUDGET_TEMPLATE_COLLECTION};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Document store shared by every collection.
    pub documents: PgDocumentStore,
    /// Clone job checkpoints.
    pub checkpoints: PgCheckpointRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentStore::new(pool.clone()),
            checkpoints: PgCheckpointRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
