//! Postgres-backed JSON path storage: the meta catalog, one physical
//! table per logical database (LDB), and the deep-set/deep-merge
//! mutation primitives that back `put`/`patch`/`delete`.
//!
//! Mutations run as a single stored-procedure call so the read-or-insert
//! decision, the write, and the `pg_notify` are atomic from the
//! database's point of view — see `sql/bootstrap.sql`.

pub mod catalog;
pub mod config;
pub mod table;

use serde_json::Value;
use sqlx::PgPool;
use tracing::instrument;

use jsonpath_core::{LdbName, ParsedPath, StoreError, StoreResult};

pub use config::DbConfig;

fn wrap(err: sqlx::Error) -> StoreError {
    StoreError::StoreFailure(err.to_string())
}

/// The storage layer's public surface: everything a caller needs
/// assuming an `LdbName` has already been parsed. Does not itself
/// decide whether a missing LDB is an error — see `jsonpath-kernel`,
/// which owns the handle cache and existence checks.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        Ok(Self::new(config.connect().await?))
    }

    /// The underlying pool, handed to `jsonpath-notify` so it can open
    /// its own dedicated `PgListener` connection.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self), fields(ldb = %name))]
    pub async fn create_ldb(&self, name: &LdbName) -> StoreResult<()> {
        table::create_ldb(&self.pool, name).await
    }

    #[instrument(skip(self), fields(ldb = %name))]
    pub async fn delete_ldb(&self, name: &LdbName) -> StoreResult<()> {
        table::delete_ldb(&self.pool, name).await
    }

    pub async fn list_ldbs(&self) -> StoreResult<Vec<String>> {
        catalog::list_ldbs(&self.pool).await
    }

    pub async fn ldb_exists(&self, name: &str) -> StoreResult<bool> {
        catalog::ldb_exists(&self.pool, name).await
    }

    /// Reads `path` (or the whole document when `path` is `None`).
    #[instrument(skip(self), fields(ldb = %name))]
    pub async fn get(&self, name: &LdbName, path: Option<&ParsedPath>) -> StoreResult<Value> {
        match path {
            Some(path) => table::get_path(&self.pool, name, path).await,
            None => table::get_all(&self.pool, name).await,
        }
    }

    #[instrument(skip(self, value), fields(ldb = %name, path = path.root_key()))]
    pub async fn put(&self, name: &LdbName, path: &ParsedPath, value: &Value) -> StoreResult<()> {
        table::upsert(&self.pool, name, path, value).await
    }

    #[instrument(skip(self, value), fields(ldb = %name, path = path.root_key()))]
    pub async fn merge(
        &self,
        name: &LdbName,
        path: &ParsedPath,
        value: &Value,
    ) -> StoreResult<()> {
        table::patch(&self.pool, name, path, value).await
    }
}
