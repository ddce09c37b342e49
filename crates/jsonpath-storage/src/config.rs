//! Database connection settings, loaded from the server's JSON config
//! file (the `db` object) or assembled directly by tests.

use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::wrap;
use jsonpath_core::StoreResult;

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

impl DbConfig {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.db)
    }

    /// Opens the pool and runs the shared, idempotent bootstrap schema
    /// (catalog table, deep-set/deep-merge functions, notifying mutation
    /// procedures). Safe to call on every process start.
    pub async fn connect(&self) -> StoreResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(self.connect_options())
            .await
            .map_err(wrap)?;

        sqlx::raw_sql(include_str!("../sql/bootstrap.sql"))
            .execute(&pool)
            .await
            .map_err(wrap)?;

        Ok(pool)
    }
}
