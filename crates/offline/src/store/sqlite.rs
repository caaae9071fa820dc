//! SQLite-backed local store.
//!
//! Tables: `events`, `announcements`, `chat_messages`, `sync_queue`,
//! `user_data`. The database is opened lazily on first use; a failed open is
//! retried on the next call.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use clubsync_core::{
    ActionId, ActionKind, ActionPayload, Announcement, ChatMessage, Collection, Event,
    QueuedAction, Records,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use super::{LocalStore, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          TEXT PRIMARY KEY,
        title       TEXT NOT NULL,
        description TEXT NULL,
        date        TEXT NOT NULL,
        location    TEXT NULL,
        capacity    INTEGER NULL,
        attendees   TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS announcements (
        id          TEXT PRIMARY KEY,
        title       TEXT NOT NULL,
        content     TEXT NOT NULL,
        date        TEXT NOT NULL,
        author      TEXT NULL,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id          TEXT PRIMARY KEY,
        message     TEXT NOT NULL,
        sender_name TEXT NOT NULL,
        sender_id   TEXT NOT NULL,
        timestamp   TEXT NOT NULL,
        synced      INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        id          TEXT NOT NULL UNIQUE,
        action      TEXT NOT NULL,
        table_name  TEXT NOT NULL,
        data        TEXT NOT NULL,
        timestamp   TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_data (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite local store.
///
/// Cheap to clone; clones share one lazily-opened pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Location,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path` (created if missing).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Private in-memory database; lives as long as this store.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the database now instead of on first use.
    pub async fn open(&self) -> StoreResult<()> {
        self.get_pool().await.map(|_| ())
    }

    /// Open the pool and create tables (called lazily on first use).
    pub(crate) async fn get_pool(&self) -> StoreResult<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = match &self.location {
            Location::File(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        StoreError::Unavailable(format!("failed to open SQLite at {:?}: {e}", path))
                    })?
            }
            Location::Memory => {
                // One connection that never recycles, or the database vanishes.
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("failed to open in-memory SQLite: {e}")))?
            }
        };

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::debug!("local store schema ready");
        *guard = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn replace_all(&self, records: Records) -> StoreResult<()> {
        let pool = self.get_pool().await?;
        let records = records.dedup_by_key();
        let table = records.collection().table_name();

        let mut tx = pool.begin().await?;
        sqlx::query(delete_statement(records.collection()))
            .execute(&mut *tx)
            .await?;

        match &records {
            Records::Events(events) => {
                for e in events {
                    sqlx::query(
                        r#"
                        INSERT INTO events (
                            id, title, description, date, location,
                            capacity, attendees, created_at, updated_at
                        )
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        "#,
                    )
                    .bind(&e.id)
                    .bind(&e.title)
                    .bind(&e.description)
                    .bind(fmt_ts(&e.date))
                    .bind(&e.location)
                    .bind(e.capacity)
                    .bind(serde_json::to_string(&e.attendees)?)
                    .bind(fmt_ts(&e.created_at))
                    .bind(fmt_ts(&e.updated_at))
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Records::Announcements(items) => {
                for a in items {
                    sqlx::query(
                        r#"
                        INSERT INTO announcements (id, title, content, date, author, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )
                    .bind(&a.id)
                    .bind(&a.title)
                    .bind(&a.content)
                    .bind(fmt_ts(&a.date))
                    .bind(&a.author)
                    .bind(fmt_ts(&a.created_at))
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Records::ChatMessages(messages) => {
                for m in messages {
                    sqlx::query(
                        r#"
                        INSERT INTO chat_messages (id, message, sender_name, sender_id, timestamp, synced)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )
                    .bind(&m.id)
                    .bind(&m.message)
                    .bind(&m.sender_name)
                    .bind(&m.sender_id)
                    .bind(fmt_ts(&m.timestamp))
                    .bind(m.synced)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        tracing::debug!(table, count = records.len(), "replaced cached collection");
        Ok(())
    }

    async fn read_all(&self, collection: Collection) -> StoreResult<Records> {
        let pool = self.get_pool().await?;

        let records = match collection {
            Collection::Events => {
                let rows = sqlx::query(
                    r#"
                    SELECT id, title, description, date, location,
                           capacity, attendees, created_at, updated_at
                    FROM events
                    ORDER BY date ASC, id ASC
                    "#,
                )
                .fetch_all(&pool)
                .await?;
                Records::Events(rows.iter().map(row_to_event).collect::<StoreResult<_>>()?)
            }
            Collection::Announcements => {
                let rows = sqlx::query(
                    r#"
                    SELECT id, title, content, date, author, created_at
                    FROM announcements
                    ORDER BY date DESC, id ASC
                    "#,
                )
                .fetch_all(&pool)
                .await?;
                Records::Announcements(
                    rows.iter().map(row_to_announcement).collect::<StoreResult<_>>()?,
                )
            }
            Collection::ChatMessages => {
                let rows = sqlx::query(
                    r#"
                    SELECT id, message, sender_name, sender_id, timestamp, synced
                    FROM chat_messages
                    ORDER BY timestamp ASC, id ASC
                    "#,
                )
                .fetch_all(&pool)
                .await?;
                Records::ChatMessages(
                    rows.iter().map(row_to_message).collect::<StoreResult<_>>()?,
                )
            }
        };

        Ok(records)
    }

    async fn enqueue(&self, action: &QueuedAction) -> StoreResult<()> {
        let pool = self.get_pool().await?;
        let data = serde_json::to_string(&action.payload.data_json()?)?;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, action, table_name, data, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(action.id.to_string())
        .bind(action.kind().as_str())
        .bind(action.payload.target())
        .bind(data)
        .bind(fmt_ts(&action.created_at))
        .execute(&pool)
        .await?;

        Ok(())
    }

    async fn dequeue_all(&self) -> StoreResult<Vec<QueuedAction>> {
        let pool = self.get_pool().await?;

        let mut tx = pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT seq, id, action, data, timestamp
            FROM sync_queue
            ORDER BY timestamp ASC, seq ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut actions = Vec::with_capacity(rows.len());
        let mut poisoned = Vec::new();
        for row in rows {
            match row_to_action(&row) {
                Ok(action) => actions.push(action),
                Err(err) => {
                    let seq: i64 = row.try_get("seq")?;
                    tracing::warn!(seq, "discarding undecodable queued action: {err}");
                    poisoned.push(seq);
                }
            }
        }

        // Undecodable rows can never replay; drop them so the pending count stays honest.
        for seq in poisoned {
            sqlx::query("DELETE FROM sync_queue WHERE seq = ?1")
                .bind(seq)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(actions)
    }

    async fn remove(&self, id: ActionId) -> StoreResult<()> {
        let pool = self.get_pool().await?;

        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id.to_string())
            .execute(&pool)
            .await?;

        Ok(())
    }

    async fn queue_len(&self) -> StoreResult<usize> {
        let pool = self.get_pool().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn clear(&self) -> StoreResult<()> {
        let pool = self.get_pool().await?;

        let mut tx = pool.begin().await?;
        for statement in [
            "DELETE FROM events",
            "DELETE FROM announcements",
            "DELETE FROM chat_messages",
            "DELETE FROM sync_queue",
            "DELETE FROM user_data",
        ] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn set_user_data(&self, key: &str, value: &str) -> StoreResult<()> {
        let pool = self.get_pool().await?;

        sqlx::query(
            r#"
            INSERT INTO user_data (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&pool)
        .await?;

        Ok(())
    }

    async fn get_user_data(&self, key: &str) -> StoreResult<Option<String>> {
        let pool = self.get_pool().await?;

        let value: Option<String> = sqlx::query_scalar("SELECT value FROM user_data WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await?;

        Ok(value)
    }
}

fn delete_statement(collection: Collection) -> &'static str {
    match collection {
        Collection::Events => "DELETE FROM events",
        Collection::Announcements => "DELETE FROM announcements",
        Collection::ChatMessages => "DELETE FROM chat_messages",
    }
}

/// Fixed-width UTC timestamps so text order matches time order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(table: &'static str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("invalid timestamp '{raw}': {e}")))
}

fn row_to_event(row: &SqliteRow) -> StoreResult<Event> {
    let attendees: String = row.try_get("attendees")?;
    let attendees = serde_json::from_str(&attendees)
        .map_err(|e| StoreError::corrupt("events", format!("invalid attendees list: {e}")))?;

    Ok(Event {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        date: parse_ts("events", &row.try_get::<String, _>("date")?)?,
        location: row.try_get("location")?,
        capacity: row.try_get("capacity")?,
        attendees,
        created_at: parse_ts("events", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("events", &row.try_get::<String, _>("updated_at")?)?,
    })
}

fn row_to_announcement(row: &SqliteRow) -> StoreResult<Announcement> {
    Ok(Announcement {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        date: parse_ts("announcements", &row.try_get::<String, _>("date")?)?,
        author: row.try_get("author")?,
        created_at: parse_ts("announcements", &row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_message(row: &SqliteRow) -> StoreResult<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        message: row.try_get("message")?,
        sender_name: row.try_get("sender_name")?,
        sender_id: row.try_get("sender_id")?,
        timestamp: parse_ts("chat_messages", &row.try_get::<String, _>("timestamp")?)?,
        synced: row.try_get("synced")?,
    })
}

fn row_to_action(row: &SqliteRow) -> StoreResult<QueuedAction> {
    let id: String = row.try_get("id")?;
    let id = id
        .parse::<ActionId>()
        .map_err(|e| StoreError::corrupt("sync_queue", e.to_string()))?;

    let kind: String = row.try_get("action")?;
    let kind = kind
        .parse::<ActionKind>()
        .map_err(|e| StoreError::corrupt("sync_queue", e.to_string()))?;

    let data: String = row.try_get("data")?;
    let payload = ActionPayload::from_parts(kind, serde_json::from_str(&data)?)?;

    let created_at = parse_ts("sync_queue", &row.try_get::<String, _>("timestamp")?)?;

    Ok(QueuedAction {
        id,
        payload,
        created_at,
    })
}
