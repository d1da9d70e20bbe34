//! Primary datastore collaborator: live ticket and user counts plus a
//! connectivity probe.

use crate::config::DatabaseConfig;
use crate::error::DatastoreError;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

/// What the metrics surface needs from the primary datastore.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Tickets that have not been soft-deleted.
    async fn count_pqrs(&self) -> Result<u64, DatastoreError>;

    /// Users that have not been soft-deleted.
    async fn count_users(&self) -> Result<u64, DatastoreError>;

    async fn ping(&self) -> Result<(), DatastoreError>;
}

/// SQL datastore over any driver sqlx ships (SQLite, MySQL).
#[derive(Debug, Clone)]
pub struct SqlDatastore {
    pool: AnyPool,
}

impl SqlDatastore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Build a lazily connecting pool, so a down database does not keep the
    /// API from starting. Connection errors surface through [`Datastore::ping`].
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, DatastoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_lazy(&config.url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn count(&self, sql: &str) -> Result<u64, DatastoreError> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        u64::try_from(count)
            .map_err(|_| DatastoreError::Unreachable(format!("negative count {count}")))
    }
}

#[async_trait]
impl Datastore for SqlDatastore {
    async fn count_pqrs(&self) -> Result<u64, DatastoreError> {
        self.count("SELECT COUNT(*) FROM pqrs WHERE deleted_at IS NULL")
            .await
    }

    async fn count_users(&self) -> Result<u64, DatastoreError> {
        self.count("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .await
    }

    async fn ping(&self) -> Result<(), DatastoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
