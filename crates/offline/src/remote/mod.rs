//! The remote authority as seen by the sync layer.

use async_trait::async_trait;
use clubsync_core::{ActionPayload, Collection, Records, RemoteError};

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

#[cfg(feature = "http")]
pub use http::{HttpProbe, HttpRemote};
pub use memory::InMemoryRemote;

/// Request/response access to the system of record.
///
/// Errors must be classified into [`RemoteError`] variants; retry vs discard
/// is decided from the variant alone.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Current contents of a collection.
    async fn list(&self, collection: Collection) -> Result<Records, RemoteError>;

    /// Replay one locally-originated mutation.
    async fn apply(&self, payload: &ActionPayload) -> Result<(), RemoteError>;
}
