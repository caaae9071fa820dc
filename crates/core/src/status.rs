//! Observable sync status (the UI-facing read model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the sync engine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// Aggregate status exposed to UI collaborators.
///
/// Derived, never persisted. Serializes as
/// `{ isOnline, syncStatus, lastSync, pendingActions }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub sync_status: SyncPhase,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_actions: usize,
}

impl SyncStatus {
    /// Short label for the status badge.
    pub fn badge(&self) -> String {
        if !self.is_online {
            return "Offline".to_string();
        }
        match self.sync_status {
            SyncPhase::Syncing => "Syncing…".to_string(),
            SyncPhase::Error => "Sync Error".to_string(),
            SyncPhase::Idle if self.pending_actions > 0 => {
                format!("{} pending", self.pending_actions)
            }
            SyncPhase::Idle => "Online".to_string(),
        }
    }
}
