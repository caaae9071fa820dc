//! `clubsync-offline`
//!
//! Offline cache-and-sync layer for the club app:
//! - local store (SQLite or in-memory) behind a fail-open wrapper
//! - connectivity monitor with transition callbacks
//! - FIFO action queue replayed by a single-flight sync engine
//! - [`CacheService`], the facade the rest of the app talks to
//!
//! The remote API stays the system of record; the local copy is a cache.

pub mod cache;
pub mod config;
pub mod network;
pub mod remote;
pub mod store;
pub mod sync_engine;
pub mod sync_worker;

pub use cache::{CacheService, SubmitOutcome};
pub use config::{ConfigError, OfflineConfig, StoreBackend};
pub use network::{ConnectivityProbe, NetworkMonitor, StaticProbe, Subscription};
pub use remote::{InMemoryRemote, RemoteAuthority};
#[cfg(feature = "http")]
pub use remote::{HttpProbe, HttpRemote};
pub use store::{FailOpenStore, LocalStore, MemoryStore, SqliteStore, StoreError};
pub use sync_engine::{DrainOutcome, EngineUpdate, SyncEngine};
pub use sync_worker::{SyncWorker, SyncWorkerHandle};
