//! Locally-originated mutations waiting for the remote authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::id::ActionId;

/// Kind tag of a queued action (the `action` column of the queue).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendMessage,
    EventSignup,
    AdminAction,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendMessage => "send_message",
            ActionKind::EventSignup => "event_signup",
            ActionKind::AdminAction => "admin_action",
        }
    }
}

impl core::str::FromStr for ActionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(ActionKind::SendMessage),
            "event_signup" => Ok(ActionKind::EventSignup),
            "admin_action" => Ok(ActionKind::AdminAction),
            other => Err(DomainError::unknown("action kind", other)),
        }
    }
}

/// A chat message composed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message: String,
    pub sender_name: String,
    pub sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSignup {
    pub event_id: String,
    pub user_id: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminOperation {
    Insert,
    Update,
    Delete,
}

/// A privileged write against an arbitrary remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAction {
    pub table: String,
    pub operation: AdminOperation,
    /// Required for update and delete.
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a queued action, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ActionPayload {
    SendMessage(OutgoingMessage),
    EventSignup(EventSignup),
    AdminAction(AdminAction),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::SendMessage(_) => ActionKind::SendMessage,
            ActionPayload::EventSignup(_) => ActionKind::EventSignup,
            ActionPayload::AdminAction(_) => ActionKind::AdminAction,
        }
    }

    /// Remote table the action writes to.
    pub fn target(&self) -> &str {
        match self {
            ActionPayload::SendMessage(_) => "chat_messages",
            ActionPayload::EventSignup(_) => "events",
            ActionPayload::AdminAction(a) => &a.table,
        }
    }

    /// Reject payloads that could never be replayed.
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            ActionPayload::SendMessage(m) => {
                if m.message.trim().is_empty() {
                    return Err(DomainError::validation("message must not be empty"));
                }
                if m.sender_id.is_empty() {
                    return Err(DomainError::validation("sender_id must not be empty"));
                }
            }
            ActionPayload::EventSignup(s) => {
                if s.event_id.is_empty() || s.user_id.is_empty() {
                    return Err(DomainError::validation(
                        "event signup needs both event_id and user_id",
                    ));
                }
            }
            ActionPayload::AdminAction(a) => {
                if a.table.is_empty() {
                    return Err(DomainError::validation("admin action needs a table"));
                }
                let needs_id = matches!(a.operation, AdminOperation::Update | AdminOperation::Delete);
                if needs_id && a.record_id.as_deref().is_none_or(str::is_empty) {
                    return Err(DomainError::validation(
                        "admin update/delete needs a record_id",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Serialized inner payload (the `data` column of the queue).
    pub fn data_json(&self) -> serde_json::Result<Value> {
        match self {
            ActionPayload::SendMessage(m) => serde_json::to_value(m),
            ActionPayload::EventSignup(s) => serde_json::to_value(s),
            ActionPayload::AdminAction(a) => serde_json::to_value(a),
        }
    }

    /// Rebuild a payload from its kind and `data` column.
    pub fn from_parts(kind: ActionKind, data: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            ActionKind::SendMessage => ActionPayload::SendMessage(serde_json::from_value(data)?),
            ActionKind::EventSignup => ActionPayload::EventSignup(serde_json::from_value(data)?),
            ActionKind::AdminAction => ActionPayload::AdminAction(serde_json::from_value(data)?),
        })
    }
}

/// A mutation not yet confirmed by the remote authority.
///
/// Never mutated in place: it is appended once and removed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub payload: ActionPayload,
    pub created_at: DateTime<Utc>,
}

impl QueuedAction {
    /// Stamp a payload for the queue.
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            id: ActionId::new(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}
