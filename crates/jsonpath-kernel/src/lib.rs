//! The public storage contract: LDB lifecycle, path reads/writes, and
//! subscription handles, composed over `jsonpath-storage` (the
//! Postgres-backed catalog and mutation primitives) and
//! `jsonpath-notify` (the per-subscription LISTEN pipeline).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::instrument;

use jsonpath_core::{LdbName, ParsedPath, PushIdGenerator, StoreError, StoreResult};
use jsonpath_notify::Subscription;
use jsonpath_storage::{DbConfig, Storage};

/// A resolved, existing LDB. Carries nothing beyond its validated name;
/// its only purpose is to let [`JsonStore::get_ldb`] cache existence
/// checks and let callers hold proof that a name was confirmed once.
#[derive(Debug, Clone)]
pub struct LdbHandle {
    name: LdbName,
}

impl LdbHandle {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// Builds a [`JsonStore`] from database connection settings.
pub struct StoreBuilder {
    db: DbConfig,
}

impl StoreBuilder {
    pub fn new(db: DbConfig) -> Self {
        Self { db }
    }

    pub async fn build(self) -> StoreResult<JsonStore> {
        let storage = Storage::connect(&self.db).await?;
        Ok(JsonStore {
            storage,
            push_ids: PushIdGenerator::new(),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// The storage engine's single entry point: every REST operation in
/// `jsonpath-server` goes through one of these methods.
pub struct JsonStore {
    storage: Storage,
    push_ids: PushIdGenerator,
    handles: Mutex<HashMap<String, Arc<LdbHandle>>>,
    closed: AtomicBool,
}

impl JsonStore {
    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ClosedStore);
        }
        Ok(())
    }

    fn cache_handle(&self, name: &LdbName) -> Arc<LdbHandle> {
        let handle = Arc::new(LdbHandle { name: name.clone() });
        self.handles
            .lock()
            .insert(name.as_str().to_owned(), handle.clone());
        handle
    }

    fn forget_handle(&self, name: &str) {
        self.handles.lock().remove(name);
    }

    /// Returns the handle for `name`, or `None` (not an error) if it
    /// does not exist. Cached after the first successful lookup.
    #[instrument(skip(self))]
    pub async fn get_ldb(&self, name: &str) -> StoreResult<Option<Arc<LdbHandle>>> {
        self.check_open()?;
        let name = LdbName::parse(name)?;

        if let Some(handle) = self.handles.lock().get(name.as_str()) {
            return Ok(Some(handle.clone()));
        }

        if self.storage.ldb_exists(name.as_str()).await? {
            Ok(Some(self.cache_handle(&name)))
        } else {
            Ok(None)
        }
    }

    async fn require_ldb(&self, name: &str) -> StoreResult<LdbName> {
        match self.get_ldb(name).await? {
            Some(handle) => Ok(handle.name.clone()),
            None => Err(StoreError::NotFound(name.to_owned())),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_ldb(&self, name: &str) -> StoreResult<()> {
        self.check_open()?;
        let name = LdbName::parse(name)?;
        self.storage.create_ldb(&name).await?;
        self.cache_handle(&name);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_ldb(&self, name: &str) -> StoreResult<()> {
        self.check_open()?;
        let parsed = LdbName::parse(name)?;
        self.storage.delete_ldb(&parsed).await?;
        self.forget_handle(parsed.as_str());
        Ok(())
    }

    pub async fn list_ldbs(&self) -> StoreResult<Vec<String>> {
        self.check_open()?;
        self.storage.list_ldbs().await
    }

    /// Reads `path` (whole document when `path` is `None`). A missing
    /// row or sub-path within an existing LDB is not an error — it
    /// reads back as `Value::Null`, matching `get`'s contract.
    #[instrument(skip(self))]
    pub async fn get(&self, ldb: &str, path: Option<&str>) -> StoreResult<Value> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let parsed = ParsedPath::parse(path)?;
        self.storage.get(&name, parsed.as_ref()).await
    }

    /// Deep-sets `value` at `path`, echoing `value` back on success.
    #[instrument(skip(self, value))]
    pub async fn put(&self, ldb: &str, path: &str, value: Value) -> StoreResult<Value> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let parsed = ParsedPath::parse(Some(path))?
            .ok_or_else(|| StoreError::InvalidPath("put requires a non-empty path".into()))?;
        self.storage.put(&name, &parsed, &value).await?;
        Ok(value)
    }

    /// Deep-merges `value` onto whatever already lives at `path`,
    /// echoing `value` back on success.
    #[instrument(skip(self, value))]
    pub async fn patch(&self, ldb: &str, path: &str, value: Value) -> StoreResult<Value> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let parsed = ParsedPath::parse(Some(path))?
            .ok_or_else(|| StoreError::InvalidPath("patch requires a non-empty path".into()))?;
        self.storage.merge(&name, &parsed, &value).await?;
        Ok(value)
    }

    /// Generates a push id, deep-sets `value` under `path/push_id`
    /// (or just `push_id` when `path` is absent), and returns the new
    /// id alongside the echoed value.
    #[instrument(skip(self, value))]
    pub async fn post(
        &self,
        ldb: &str,
        path: Option<&str>,
        value: Value,
    ) -> StoreResult<(String, Value)> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let push_id = self.push_ids.next();

        let target = match ParsedPath::parse(path)? {
            Some(parsed) => parsed.joined(&push_id),
            None => ParsedPath::parse(Some(&push_id))?.expect("push id is non-empty"),
        };

        self.storage.put(&name, &target, &value).await?;
        Ok((push_id, value))
    }

    /// Deletes `path` by deep-setting `null` there — the upsert
    /// algorithm never distinguishes delete from put, so this always
    /// emits a `put` change record.
    #[instrument(skip(self))]
    pub async fn delete(&self, ldb: &str, path: &str) -> StoreResult<()> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let parsed = ParsedPath::parse(Some(path))?
            .ok_or_else(|| StoreError::InvalidPath("delete requires a non-empty path".into()))?;
        self.storage.put(&name, &parsed, &Value::Null).await
    }

    /// Opens a subscription to `ldb`'s change notification channel,
    /// filtered to records whose `/`-joined path starts with `path`
    /// (every change when `path` is `None`).
    #[instrument(skip(self))]
    pub async fn subscribe(&self, ldb: &str, path: Option<&str>) -> StoreResult<Subscription> {
        self.check_open()?;
        let name = self.require_ldb(ldb).await?;
        let prefix = ParsedPath::parse(path)?
            .map(|p| p.segments().join("/"))
            .unwrap_or_default();
        Subscription::open(self.storage.pool(), name.into_string(), prefix).await
    }

    /// Marks the store closed. Every subsequent call returns
    /// [`StoreError::ClosedStore`]; outstanding subscriptions are left
    /// running (callers are expected to cancel their own).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closed_store_rejects_every_call() {
        // A `Storage` needs a live pool, so this only exercises the
        // closed-store short-circuit, not the database path.
        let store = JsonStore {
            storage: Storage::new(sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap()),
            push_ids: PushIdGenerator::new(),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };

        store.close();
        let err = store.get("notes", None).await.unwrap_err();
        assert!(matches!(err, StoreError::ClosedStore));
    }

    /// Scenario tests against a real Postgres instance, gated on
    /// `DATABASE_URL` so the suite stays runnable without one. Each
    /// mirrors a literal S1-S6 scenario from the storage engine's
    /// testable-properties list.
    async fn scenario_store() -> Option<JsonStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = sqlx::PgPool::connect(&url).await.ok()?;
        sqlx::raw_sql(include_str!("../../jsonpath-storage/sql/bootstrap.sql"))
            .execute(&pool)
            .await
            .ok()?;
        let storage = Storage::new(pool);
        Some(JsonStore {
            storage,
            push_ids: PushIdGenerator::new(),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn with_temp_ldb<F, Fut>(store: &JsonStore, body: F)
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let name = format!("scenario_{}", store.push_ids.next().to_lowercase());
        store.create_ldb(&name).await.expect("create_ldb");
        body(name.clone()).await;
        store.delete_ldb(&name).await.expect("delete_ldb");
    }

    #[tokio::test]
    async fn s1_put_get_nested_object() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            store
                .put(&ldb, "a/b/c", json!({"d": 1}))
                .await
                .expect("put");
            assert_eq!(
                store.get(&ldb, Some("a/b")).await.unwrap(),
                json!({"c": {"d": 1}})
            );
            assert_eq!(
                store.get(&ldb, Some("a/b/c")).await.unwrap(),
                json!({"d": 1})
            );
        })
        .await;
    }

    #[tokio::test]
    async fn s2_replace_scalar_with_object_then_merge() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            store.put(&ldb, "f", json!(0.01)).await.unwrap();
            store.put(&ldb, "f/b/c", json!(1.05)).await.unwrap();
            assert_eq!(
                store.get(&ldb, Some("f/b")).await.unwrap(),
                json!({"c": 1.05})
            );
            store.put(&ldb, "f/d", json!(1.05)).await.unwrap();
            assert_eq!(
                store.get(&ldb, Some("f")).await.unwrap(),
                json!({"b": {"c": 1.05}, "d": 1.05})
            );
            store.put(&ldb, "f/b", json!(1.05)).await.unwrap();
            assert_eq!(
                store.get(&ldb, Some("f")).await.unwrap(),
                json!({"b": 1.05, "d": 1.05})
            );
        })
        .await;
    }

    #[tokio::test]
    async fn s3_whole_document_read_unions_rows_without_rewrapping() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            store.put(&ldb, "a/b/c", json!({"d": 1})).await.unwrap();
            store.put(&ldb, "f/b/c", json!(1.05)).await.unwrap();
            store.put(&ldb, "f/d", json!(1.05)).await.unwrap();

            assert_eq!(
                store.get(&ldb, None).await.unwrap(),
                json!({
                    "a": {"b": {"c": {"d": 1}}},
                    "f": {"b": {"c": 1.05}, "d": 1.05},
                })
            );
        })
        .await;
    }

    #[tokio::test]
    async fn s4_patch_preserves_siblings() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            store
                .put(
                    &ldb,
                    "users/alan",
                    json!({"name": "Alan Turing", "birthday": "June 23, 1912"}),
                )
                .await
                .unwrap();
            store
                .patch(&ldb, "users/alan", json!({"nickname": "The Machine"}))
                .await
                .unwrap();
            let value = store.get(&ldb, Some("users/alan")).await.unwrap();
            assert_eq!(value["name"], "Alan Turing");
            assert_eq!(value["birthday"], "June 23, 1912");
            assert_eq!(value["nickname"], "The Machine");
        })
        .await;
    }

    #[tokio::test]
    async fn s5_post_assigns_id() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            let (push_id, echoed) = store
                .post(&ldb, Some("posts"), json!({"title": "T"}))
                .await
                .unwrap();
            assert_eq!(push_id.len(), 20);
            assert_eq!(echoed, json!({"title": "T"}));
            let stored = store
                .get(&ldb, Some(&format!("posts/{push_id}")))
                .await
                .unwrap();
            assert_eq!(stored, json!({"title": "T"}));
        })
        .await;
    }

    #[tokio::test]
    async fn delete_writes_null_rather_than_removing_the_key() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            store.put(&ldb, "a/b", json!(1)).await.unwrap();
            store.delete(&ldb, "a/b").await.unwrap();
            assert_eq!(store.get(&ldb, Some("a/b")).await.unwrap(), Value::Null);
            // The root key row itself is untouched: sibling data survives.
            store.put(&ldb, "a/c", json!(2)).await.unwrap();
            assert_eq!(
                store.get(&ldb, Some("a")).await.unwrap(),
                json!({"b": Value::Null, "c": 2})
            );
        })
        .await;
    }

    #[tokio::test]
    async fn s6_subscription_sees_only_matching_prefix() {
        let Some(store) = scenario_store().await else {
            return;
        };
        with_temp_ldb(&store, |ldb| async move {
            let subscription = store.subscribe(&ldb, Some("x/posts")).await.unwrap();
            let mut records = Box::pin(subscription.into_stream().await);

            store
                .post(&ldb, Some("x/posts"), json!({"t": 1}))
                .await
                .unwrap();
            store
                .post(&ldb, Some("x/posts"), json!({"t": 2}))
                .await
                .unwrap();
            store
                .post(&ldb, Some("x/msgs"), json!({"t": 9}))
                .await
                .unwrap();

            use futures_util::StreamExt;
            let first = tokio::time::timeout(std::time::Duration::from_secs(5), records.next())
                .await
                .expect("first record")
                .expect("stream not closed");
            assert_eq!(first.data, json!({"t": 1}));
            assert!(first.joined_path().starts_with("x/posts/"));

            let second = tokio::time::timeout(std::time::Duration::from_secs(5), records.next())
                .await
                .expect("second record")
                .expect("stream not closed");
            assert_eq!(second.data, json!({"t": 2}));

            subscription.cancel().await;
        })
        .await;
    }
}
