//! In-memory local store for tests/dev and hosts without a data directory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use clubsync_core::{ActionId, Collection, QueuedAction, Records};

use super::{LocalStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Collection, Records>,
    /// Insertion order; FIFO is re-established by a stable sort on read.
    queue: Vec<QueuedAction>,
    user_data: HashMap<String, String>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> StoreResult<T> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> StoreResult<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

/// Sort a collection into its natural order (same order as the SQLite backend).
pub(crate) fn natural_order(records: Records) -> Records {
    match records {
        Records::Events(mut v) => {
            v.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
            Records::Events(v)
        }
        Records::Announcements(mut v) => {
            v.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
            Records::Announcements(v)
        }
        Records::ChatMessages(mut v) => {
            v.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
            Records::ChatMessages(v)
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn replace_all(&self, records: Records) -> StoreResult<()> {
        let collection = records.collection();
        let records = natural_order(records.dedup_by_key());
        self.write(|inner| {
            inner.collections.insert(collection, records);
        })
    }

    async fn read_all(&self, collection: Collection) -> StoreResult<Records> {
        self.read(|inner| {
            inner
                .collections
                .get(&collection)
                .cloned()
                .unwrap_or_else(|| Records::empty(collection))
        })
    }

    async fn enqueue(&self, action: &QueuedAction) -> StoreResult<()> {
        self.write(|inner| inner.queue.push(action.clone()))
    }

    async fn dequeue_all(&self) -> StoreResult<Vec<QueuedAction>> {
        self.read(|inner| {
            let mut queue = inner.queue.clone();
            queue.sort_by_key(|a| a.created_at);
            queue
        })
    }

    async fn remove(&self, id: ActionId) -> StoreResult<()> {
        self.write(|inner| inner.queue.retain(|a| a.id != id))
    }

    async fn queue_len(&self) -> StoreResult<usize> {
        self.read(|inner| inner.queue.len())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.write(|inner| *inner = Inner::default())
    }

    async fn set_user_data(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write(|inner| {
            inner.user_data.insert(key.to_string(), value.to_string());
        })
    }

    async fn get_user_data(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(|inner| inner.user_data.get(key).cloned())
    }
}
