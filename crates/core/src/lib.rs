//! `clubsync-core`: shared types of the offline cache-and-sync layer.
//!
//! Pure data and contracts (no storage, no IO): cached entity snapshots,
//! queued actions, the observable sync status and the remote error taxonomy.

pub mod action;
pub mod entity;
pub mod error;
pub mod id;
pub mod status;

pub use action::{
    ActionKind, ActionPayload, AdminAction, AdminOperation, EventSignup, OutgoingMessage,
    QueuedAction,
};
pub use entity::{Announcement, CachedEntity, ChatMessage, Collection, Event, Records};
pub use error::{DomainError, DomainResult, RemoteError};
pub use id::ActionId;
pub use status::{SyncPhase, SyncStatus};
