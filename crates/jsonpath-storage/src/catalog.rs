//! The meta catalog: the set of logical databases (LDBs) that currently
//! have a backing physical table.

use sqlx::PgPool;

use jsonpath_core::StoreResult;

use crate::wrap;

pub async fn ldb_exists(pool: &PgPool, name: &str) -> StoreResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM storage_meta WHERE db_name = $1)",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .map_err(wrap)?;
    Ok(exists)
}

pub async fn list_ldbs(pool: &PgPool) -> StoreResult<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT db_name FROM storage_meta ORDER BY db_name")
            .fetch_all(pool)
            .await
            .map_err(wrap)?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}
