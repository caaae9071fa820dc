//! Cached entity snapshots and the collections that hold them.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A named collection of cached remote records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Events,
    Announcements,
    ChatMessages,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Events,
        Collection::Announcements,
        Collection::ChatMessages,
    ];

    /// Table name, both locally and on the remote authority.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Announcements => "announcements",
            Collection::ChatMessages => "chat_messages",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.table_name() == s)
            .ok_or_else(|| DomainError::unknown("collection", s))
    }
}

/// Calendar event as cached from the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub capacity: Option<i64>,
    /// Member ids signed up for the event.
    #[serde(default)]
    pub attendees: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub message: String,
    pub sender_name: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    /// `false` for rows that have not been confirmed by the remote authority.
    #[serde(default = "default_synced")]
    pub synced: bool,
}

fn default_synced() -> bool {
    true
}

/// The contents of one collection, typed by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "records", rename_all = "snake_case")]
pub enum Records {
    Events(Vec<Event>),
    Announcements(Vec<Announcement>),
    ChatMessages(Vec<ChatMessage>),
}

impl Records {
    /// An empty record set for `collection`.
    pub fn empty(collection: Collection) -> Self {
        match collection {
            Collection::Events => Records::Events(Vec::new()),
            Collection::Announcements => Records::Announcements(Vec::new()),
            Collection::ChatMessages => Records::ChatMessages(Vec::new()),
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Records::Events(_) => Collection::Events,
            Records::Announcements(_) => Collection::Announcements,
            Records::ChatMessages(_) => Collection::ChatMessages,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Events(v) => v.len(),
            Records::Announcements(v) => v.len(),
            Records::ChatMessages(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collapse duplicate keys, keeping the last occurrence of each.
    ///
    /// Relative order of the surviving records is preserved.
    pub fn dedup_by_key(self) -> Self {
        match self {
            Records::Events(v) => Records::Events(keep_last(v)),
            Records::Announcements(v) => Records::Announcements(keep_last(v)),
            Records::ChatMessages(v) => Records::ChatMessages(keep_last(v)),
        }
    }
}

fn keep_last<T: CachedEntity>(records: Vec<T>) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<T> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.key().to_owned()))
        .collect();
    out.reverse();
    out
}

/// A denormalized snapshot of a remote record, keyed by its remote id.
///
/// Implemented by each cached family so the facade can stay generic.
pub trait CachedEntity: Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Remote identifier.
    fn key(&self) -> &str;

    fn into_records(items: Vec<Self>) -> Records;

    /// Extract this family from `records`; a mismatched family yields nothing.
    fn from_records(records: Records) -> Vec<Self>;
}

macro_rules! impl_cached_entity {
    ($t:ty, $variant:ident) => {
        impl CachedEntity for $t {
            const COLLECTION: Collection = Collection::$variant;

            fn key(&self) -> &str {
                &self.id
            }

            fn into_records(items: Vec<Self>) -> Records {
                Records::$variant(items)
            }

            fn from_records(records: Records) -> Vec<Self> {
                match records {
                    Records::$variant(items) => items,
                    _ => Vec::new(),
                }
            }
        }
    };
}

impl_cached_entity!(Event, Events);
impl_cached_entity!(Announcement, Announcements);
impl_cached_entity!(ChatMessage, ChatMessages);

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            message: text.to_string(),
            sender_name: "Ana".to_string(),
            sender_id: "u-1".to_string(),
            timestamp: Utc::now(),
            synced: true,
        }
    }

    #[test]
    fn collection_names_parse_back() {
        for c in Collection::ALL {
            assert_eq!(c.table_name().parse::<Collection>().unwrap(), c);
        }
        assert!("quiz".parse::<Collection>().is_err());
    }

    #[test]
    fn dedup_keeps_last_occurrence_in_place() {
        let records = Records::ChatMessages(vec![
            message("a", "first"),
            message("b", "other"),
            message("a", "second"),
        ]);

        let out = ChatMessage::from_records(records.dedup_by_key());
        let texts: Vec<_> = out.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["other", "second"]);
    }

    #[test]
    fn mismatched_family_yields_nothing() {
        let records = Records::ChatMessages(vec![message("a", "hi")]);
        assert!(Event::from_records(records).is_empty());
    }

    #[test]
    fn chat_message_defaults_to_synced() {
        let json = serde_json::json!({
            "id": "m1",
            "message": "hi",
            "sender_name": "Ana",
            "sender_id": "u-1",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let msg: ChatMessage = serde_json::from_value(json).unwrap();
        assert!(msg.synced);
    }
}
