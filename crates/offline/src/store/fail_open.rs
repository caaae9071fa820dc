//! Fail-open wrapper around a [`LocalStore`].
//!
//! Every storage fault is logged here and degraded: reads return empty
//! results, writes become no-ops. Nothing above this layer sees a
//! [`StoreError`].

use std::sync::Arc;

use clubsync_core::{ActionId, CachedEntity, Collection, QueuedAction, Records};
use tokio::sync::Mutex;

use super::{LocalStore, StoreResult};

/// Infallible, serialized view of the local store.
pub struct FailOpenStore {
    inner: Arc<dyn LocalStore>,
    /// Serializes access; queue reads and writes must not interleave.
    gate: Mutex<()>,
}

impl core::fmt::Debug for FailOpenStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FailOpenStore").finish_non_exhaustive()
    }
}

impl FailOpenStore {
    pub fn new(inner: Arc<dyn LocalStore>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    /// Replace the cached rows of `T`'s collection. Returns whether it was written.
    pub async fn replace_all<T: CachedEntity>(&self, records: Vec<T>) -> bool {
        let _gate = self.gate.lock().await;
        absorb(
            "replace cached collection",
            self.inner.replace_all(T::into_records(records)).await,
        )
        .is_some()
    }

    /// Replace a collection from an untyped record set.
    pub async fn replace_records(&self, records: Records) -> bool {
        let _gate = self.gate.lock().await;
        absorb("replace cached collection", self.inner.replace_all(records).await).is_some()
    }

    pub async fn read_all<T: CachedEntity>(&self) -> Vec<T> {
        let _gate = self.gate.lock().await;
        absorb("read cached collection", self.inner.read_all(T::COLLECTION).await)
            .map(T::from_records)
            .unwrap_or_default()
    }

    pub async fn read_records(&self, collection: Collection) -> Records {
        let _gate = self.gate.lock().await;
        absorb("read cached collection", self.inner.read_all(collection).await)
            .unwrap_or_else(|| Records::empty(collection))
    }

    pub async fn enqueue(&self, action: &QueuedAction) -> bool {
        let _gate = self.gate.lock().await;
        absorb("enqueue action", self.inner.enqueue(action).await).is_some()
    }

    pub async fn dequeue_all(&self) -> Vec<QueuedAction> {
        let _gate = self.gate.lock().await;
        absorb("list queued actions", self.inner.dequeue_all().await).unwrap_or_default()
    }

    pub async fn remove(&self, id: ActionId) -> bool {
        let _gate = self.gate.lock().await;
        absorb("remove queued action", self.inner.remove(id).await).is_some()
    }

    pub async fn queue_len(&self) -> usize {
        let _gate = self.gate.lock().await;
        absorb("count queued actions", self.inner.queue_len().await).unwrap_or(0)
    }

    pub async fn clear(&self) -> bool {
        let _gate = self.gate.lock().await;
        absorb("clear local store", self.inner.clear().await).is_some()
    }

    pub async fn set_user_data(&self, key: &str, value: &str) -> bool {
        let _gate = self.gate.lock().await;
        absorb("write user data", self.inner.set_user_data(key, value).await).is_some()
    }

    pub async fn get_user_data(&self, key: &str) -> Option<String> {
        let _gate = self.gate.lock().await;
        absorb("read user data", self.inner.get_user_data(key).await).flatten()
    }
}

fn absorb<T>(operation: &'static str, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(operation, "local store failed: {err}");
            None
        }
    }
}
