//! Local persistent store: cached collections, the durable action queue and
//! a key-value scratch table.
//!
//! `LocalStore` is the fallible backend contract. Callers outside this module
//! go through [`FailOpenStore`], which absorbs storage faults.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clubsync_core::{ActionId, Collection, QueuedAction, Records};
use thiserror::Error;

use crate::config::{OfflineConfig, StoreBackend};

pub mod fail_open;
pub mod memory;
pub mod sqlite;

pub use fail_open::FailOpenStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine could not be opened (or a previous open failed).
    #[error("local store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend contract for the local store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Atomically clear and repopulate `records.collection()`.
    async fn replace_all(&self, records: Records) -> StoreResult<()>;

    /// All rows of a collection in its natural order.
    async fn read_all(&self, collection: Collection) -> StoreResult<Records>;

    /// Append to the durable queue.
    async fn enqueue(&self, action: &QueuedAction) -> StoreResult<()>;

    /// Queue contents in FIFO order, without removing them.
    async fn dequeue_all(&self) -> StoreResult<Vec<QueuedAction>>;

    /// Remove one queued action; unknown ids are a no-op.
    async fn remove(&self, id: ActionId) -> StoreResult<()>;

    async fn queue_len(&self) -> StoreResult<usize>;

    /// Wipe every collection, the queue and user data.
    async fn clear(&self) -> StoreResult<()>;

    async fn set_user_data(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn get_user_data(&self, key: &str) -> StoreResult<Option<String>>;
}

#[async_trait]
impl<S> LocalStore for Arc<S>
where
    S: LocalStore + ?Sized,
{
    async fn replace_all(&self, records: Records) -> StoreResult<()> {
        (**self).replace_all(records).await
    }

    async fn read_all(&self, collection: Collection) -> StoreResult<Records> {
        (**self).read_all(collection).await
    }

    async fn enqueue(&self, action: &QueuedAction) -> StoreResult<()> {
        (**self).enqueue(action).await
    }

    async fn dequeue_all(&self) -> StoreResult<Vec<QueuedAction>> {
        (**self).dequeue_all().await
    }

    async fn remove(&self, id: ActionId) -> StoreResult<()> {
        (**self).remove(id).await
    }

    async fn queue_len(&self) -> StoreResult<usize> {
        (**self).queue_len().await
    }

    async fn clear(&self) -> StoreResult<()> {
        (**self).clear().await
    }

    async fn set_user_data(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set_user_data(key, value).await
    }

    async fn get_user_data(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get_user_data(key).await
    }
}

/// Pick a backend at startup.
///
/// `Auto` uses SQLite when a database path can be resolved and its directory
/// created, and falls back to the in-memory store otherwise. The SQLite file
/// itself is opened lazily, so a later open failure degrades through
/// [`FailOpenStore`] instead of failing here.
pub fn select_backend(config: &OfflineConfig) -> Arc<dyn LocalStore> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory local store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Sqlite => {
            let path = config.db_path.clone().unwrap_or_else(|| {
                default_db_path().unwrap_or_else(|err| {
                    tracing::error!("failed to resolve cache DB path: {err:?}");
                    PathBuf::from("clubsync-cache.db")
                })
            });
            tracing::info!("using SQLite local store at {:?}", path);
            Arc::new(SqliteStore::new(path))
        }
        StoreBackend::Auto => {
            let resolved = match &config.db_path {
                Some(path) => ensure_parent(path).map(|_| path.clone()),
                None => default_db_path(),
            };
            match resolved {
                Ok(path) => {
                    tracing::info!("using SQLite local store at {:?}", path);
                    Arc::new(SqliteStore::new(path))
                }
                Err(err) => {
                    tracing::warn!("no writable data directory, falling back to memory store: {err:?}");
                    Arc::new(MemoryStore::new())
                }
            }
        }
    }
}

/// Resolve the SQLite cache path: `{app_data_dir}/clubsync/cache.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("clubsync");
    path.push("cache.db");
    ensure_parent(&path)?;

    Ok(path)
}

fn ensure_parent(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory at {:?}", parent))?;
    }
    Ok(())
}
