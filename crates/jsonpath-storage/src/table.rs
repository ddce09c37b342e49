//! Per-LDB physical tables: one table per logical database, keyed by the
//! first path segment ("root key"), holding the rest of that root key's
//! subtree as a single JSONB document.

use serde_json::Value;
use sqlx::PgPool;

use jsonpath_core::{LdbName, ParsedPath, StoreError, StoreResult};

use crate::catalog;
use crate::wrap;

/// Creates the physical table and its `last_modified` trigger, and
/// registers the LDB in the catalog, as a single transaction. Fails
/// with [`StoreError::AlreadyExists`] if the name is already registered.
pub async fn create_ldb(pool: &PgPool, name: &LdbName) -> StoreResult<()> {
    if catalog::ldb_exists(pool, name.as_str()).await? {
        return Err(StoreError::AlreadyExists(name.to_string()));
    }

    let mut tx = pool.begin().await.map_err(wrap)?;

    let create_table = format!(
        "CREATE TABLE \"{t}\" (\
             root_key VARCHAR(255) PRIMARY KEY, \
             data JSONB NOT NULL, \
             created TIMESTAMPTZ NOT NULL DEFAULT now(), \
             last_modified TIMESTAMPTZ NOT NULL DEFAULT now()\
         )",
        t = name.as_str()
    );
    sqlx::query(&create_table)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;

    let create_trigger = format!(
        "CREATE TRIGGER touch_last_modified BEFORE UPDATE ON \"{t}\" \
         FOR EACH ROW EXECUTE FUNCTION jsonpath_touch_last_modified()",
        t = name.as_str()
    );
    sqlx::query(&create_trigger)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;

    sqlx::query("INSERT INTO storage_meta (db_name) VALUES ($1)")
        .bind(name.as_str())
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;

    tx.commit().await.map_err(wrap)?;
    Ok(())
}

/// Drops the physical table and removes the catalog entry, as a single
/// transaction. Fails with [`StoreError::NotFound`] if the name is not
/// registered.
pub async fn delete_ldb(pool: &PgPool, name: &LdbName) -> StoreResult<()> {
    if !catalog::ldb_exists(pool, name.as_str()).await? {
        return Err(StoreError::NotFound(name.to_string()));
    }

    let mut tx = pool.begin().await.map_err(wrap)?;

    sqlx::query("DELETE FROM storage_meta WHERE db_name = $1")
        .bind(name.as_str())
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;

    let drop_table = format!("DROP TABLE \"{}\"", name.as_str());
    sqlx::query(&drop_table)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;

    tx.commit().await.map_err(wrap)?;
    Ok(())
}

/// Reads the value at `path` within `name`'s table, or `Value::Null` if
/// the row or the sub-path does not exist. Assumes `name` is registered
/// — callers check LDB existence upstream and map absence to
/// [`StoreError::NotFound`] themselves.
pub async fn get_path(pool: &PgPool, name: &LdbName, path: &ParsedPath) -> StoreResult<Value> {
    let query = format!(
        "SELECT data #> $2 FROM \"{t}\" WHERE root_key = $1",
        t = name.as_str()
    );
    let row: Option<(Option<Value>,)> = sqlx::query_as(&query)
        .bind(path.root_key())
        .bind(path.segments())
        .fetch_optional(pool)
        .await
        .map_err(wrap)?;

    Ok(row.and_then(|(value,)| value).unwrap_or(Value::Null))
}

/// Reads every row in `name`'s table and merges them into a single
/// object — the whole-document view. Each row's `data` column is
/// already shaped `{root_key: subtree}` (see `upsert`'s skeleton
/// insert), so this unions each row's single entry rather than nesting
/// the row under its own key again. Rows are disjoint by construction
/// (one row per root key), so this is a plain union, not a deep merge.
pub async fn get_all(pool: &PgPool, name: &LdbName) -> StoreResult<Value> {
    let query = format!("SELECT data FROM \"{}\"", name.as_str());
    let rows: Vec<(Value,)> = sqlx::query_as(&query)
        .fetch_all(pool)
        .await
        .map_err(wrap)?;

    let mut merged = serde_json::Map::with_capacity(rows.len());
    for (data,) in rows {
        if let Value::Object(obj) = data {
            merged.extend(obj);
        }
    }
    Ok(Value::Object(merged))
}

/// Deep-sets `value` at `path`, inserting a fresh row first if
/// `path.root_key()` has no row yet, and notifies subscribers on the
/// table's channel. See `upsert_json_data_notify` in `sql/bootstrap.sql`.
pub async fn upsert(
    pool: &PgPool,
    name: &LdbName,
    path: &ParsedPath,
    value: &Value,
) -> StoreResult<()> {
    let skeleton = path.build_skeleton(value.clone());
    sqlx::query("SELECT upsert_json_data_notify($1, $2, $3, $4, $5)")
        .bind(name.as_str())
        .bind(path.root_key())
        .bind(&skeleton)
        .bind(path.segments())
        .bind(value)
        .execute(pool)
        .await
        .map_err(wrap)?;
    Ok(())
}

/// Deep-merges `value` onto whatever already lives at `path`, inserting
/// a fresh row first if needed, and notifies subscribers. See
/// `patch_json_data_notify` in `sql/bootstrap.sql`.
pub async fn patch(
    pool: &PgPool,
    name: &LdbName,
    path: &ParsedPath,
    value: &Value,
) -> StoreResult<()> {
    let skeleton = path.build_skeleton(value.clone());
    sqlx::query("SELECT patch_json_data_notify($1, $2, $3, $4, $5)")
        .bind(name.as_str())
        .bind(path.root_key())
        .bind(&skeleton)
        .bind(path.segments())
        .bind(value)
        .execute(pool)
        .await
        .map_err(wrap)?;
    Ok(())
}
