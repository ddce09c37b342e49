//! Per-subscription change notification pipeline.
//!
//! Each subscription opens its own `PgListener` connection (Postgres
//! requires a dedicated connection per `LISTEN`), and forwards parsed
//! [`ChangeRecord`]s matching the subscriber's path prefix onto an
//! unbounded channel exposed as an async [`Stream`]. No busy-poll: the
//! background task blocks on the listener and on a cancellation
//! notification, nothing else.
//!
//! The prefix match is a plain string-prefix test on the `/`-joined
//! path, not segment equality — prefix `"x/po"` matches path
//! `"x/posts/1"`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, warn};

use jsonpath_core::{ChangeRecord, StoreError, StoreResult};

/// A single subscriber's handle to an LDB's notification channel.
/// Dropping it does not cancel the background listener task — call
/// [`Subscription::cancel`] for that, so callers can hold the receiving
/// stream and the cancellation handle separately (e.g. an SSE body and
/// a disconnect hook).
pub struct Subscription {
    receiver: AsyncMutex<Option<mpsc::UnboundedReceiver<ChangeRecord>>>,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Opens a dedicated `LISTEN` connection on `channel` (the LDB's
    /// table name) and starts forwarding change records whose `/`-joined
    /// path starts with `prefix` (an empty prefix matches everything).
    #[instrument(skip(pool), fields(channel = %channel))]
    pub async fn open(pool: &PgPool, channel: String, prefix: String) -> StoreResult<Self> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(|e| StoreError::StoreFailure(e.to_string()))?;
        listener
            .listen(&channel)
            .await
            .map_err(|e| StoreError::StoreFailure(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(forward_notifications(
            listener,
            sender,
            prefix,
            cancel.clone(),
            cancelled.clone(),
        ));

        Ok(Self {
            receiver: AsyncMutex::new(Some(receiver)),
            cancel,
            cancelled,
            task: AsyncMutex::new(Some(task)),
        })
    }

    /// Turns this subscription into a stream of change records. May
    /// only be called once; panics on a second call, since the
    /// receiver is consumed the first time.
    pub async fn into_stream(&self) -> impl Stream<Item = ChangeRecord> {
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("subscription stream already taken");
        UnboundedReceiverStream::new(receiver)
    }

    /// Stops the background listener task and waits for it to exit.
    /// Idempotent: a second call is a no-op.
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.notify_waiters();

        let mut guard = self.task.lock().await;
        if let Some(task) = guard.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    /// Dropping a subscription (e.g. an SSE response body whose client
    /// disconnected) must not leak its listener task. `Drop` can't
    /// await the join, so it only flips the cancel signal — the task
    /// observes it and exits on its own.
    fn drop(&mut self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.cancel.notify_waiters();
        }
    }
}

async fn forward_notifications(
    mut listener: PgListener,
    sender: mpsc::UnboundedSender<ChangeRecord>,
    prefix: String,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.notified() => {
                debug!("subscription cancelled");
                return;
            }
            notification = listener.recv() => {
                let notification = match notification {
                    Ok(n) => n,
                    Err(err) => {
                        warn!(error = %err, "listener connection lost, ending subscription");
                        return;
                    }
                };

                let record: ChangeRecord = match serde_json::from_str(notification.payload()) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(error = %err, "malformed change notification payload, skipping");
                        continue;
                    }
                };

                if !matches_prefix(&record.joined_path(), &prefix) {
                    continue;
                }

                if sender.send(record).is_err() {
                    debug!("subscriber dropped the receiving end, ending subscription");
                    return;
                }
            }
        }
    }
}

/// String-prefix test on the `/`-joined path, per spec: a partial
/// segment like `"x/po"` matches `"x/posts/1"`, not just whole-segment
/// prefixes.
fn matches_prefix(joined_path: &str, prefix: &str) -> bool {
    joined_path.starts_with(prefix)
}
