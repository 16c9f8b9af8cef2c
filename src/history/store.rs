//! Durable chat history stores.

use super::{ChatMessage, MessageStatus, MessageType};
use crate::backend::{decode, endpoint, http_client, send_checked};
use crate::classifier::Category;
use crate::config::BackendConfig;
use crate::error::{ParleyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One stored exchange as it appears on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

/// `responseType` stored for exchanges that failed.
pub const ERRORED_RESPONSE_TYPE: &str = "error";

impl HistoryRecord {
    /// Rebuild an in-memory message, defaulting missing fields to `text` and
    /// `general`. Records stored as `error` come back errored.
    #[must_use]
    pub fn into_message(self, id: u64) -> ChatMessage {
        let errored = self.response_type.as_deref() == Some(ERRORED_RESPONSE_TYPE);
        let response_type = self
            .response_type
            .as_deref()
            .and_then(|name| name.parse::<Category>().ok())
            .unwrap_or(Category::General);
        ChatMessage {
            id,
            user_message: self.message,
            ai_response: self.response,
            message_type: self.message_type.unwrap_or_default(),
            response_type,
            status: if errored {
                MessageStatus::Errored
            } else {
                MessageStatus::Complete
            },
            timestamp: self.timestamp,
            classification: None,
        }
    }
}

/// Opaque durable store with append, read and clear.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store one exchange.
    async fn append(&self, token: &str, record: &HistoryRecord) -> Result<()>;

    /// Up to `limit` most recent exchanges, oldest first.
    async fn load_recent(&self, token: &str, limit: usize) -> Result<Vec<HistoryRecord>>;

    /// Remove every stored exchange.
    async fn clear(&self, token: &str) -> Result<()>;
}

// ── HTTP ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

impl StatusReply {
    fn check(self, op: &str) -> Result<()> {
        if self.success == Some(false) {
            return Err(ParleyError::History(format!(
                "{op} rejected: {}",
                self.message.unwrap_or_else(|| "no reason given".into())
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct HistoryPage {
    #[serde(default)]
    history: Vec<HistoryRecord>,
}

#[derive(Deserialize)]
struct LoadReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    history: Option<Vec<HistoryRecord>>,
    /// Some servers nest the page under `data`.
    #[serde(default)]
    data: Option<HistoryPage>,
}

/// History store backed by the assistant server's `/history` endpoint.
#[derive(Debug, Clone)]
pub struct HttpHistoryStore {
    client: reqwest::Client,
    url: String,
}

impl HttpHistoryStore {
    /// Create a store talking to `{config.server_url}/history`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: endpoint(&config.server_url, "history"),
        })
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn append(&self, token: &str, record: &HistoryRecord) -> Result<()> {
        let body = send_checked(self.client.post(&self.url).bearer_auth(token).json(record)).await?;
        decode::<StatusReply>(&body)?.check("append")
    }

    async fn load_recent(&self, token: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let body = send_checked(
            self.client
                .get(&self.url)
                .bearer_auth(token)
                .query(&[("limit", limit)]),
        )
        .await?;
        let reply: LoadReply = decode(&body)?;
        if reply.success == Some(false) {
            return Err(ParleyError::History(format!(
                "load rejected: {}",
                reply.message.unwrap_or_else(|| "no reason given".into())
            )));
        }

        let mut records = reply
            .history
            .or(reply.data.map(|page| page.history))
            .unwrap_or_default();
        // Servers disagree on order; normalise to oldest first.
        records.sort_by_key(|r| r.timestamp);
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        debug!("fetched {} history records", records.len());
        Ok(records)
    }

    async fn clear(&self, token: &str) -> Result<()> {
        let body = send_checked(self.client.delete(&self.url).bearer_auth(token)).await?;
        decode::<StatusReply>(&body)?.check("clear")
    }
}

// ── SQLite ──────────────────────────────────────────────────────────────

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    message       TEXT NOT NULL,
    response      TEXT NOT NULL,
    message_type  TEXT,
    response_type TEXT,
    timestamp     TEXT NOT NULL
);";

/// Local history store in a single SQLite file.
///
/// The token is ignored; the file belongs to whoever runs the process.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("history database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the schema.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| ParleyError::History(format!("lock poisoned: {e}")))?;
            op(&*guard)
        })
        .await
        .map_err(|e| ParleyError::History(format!("store task failed: {e}")))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let timestamp: String = row.get(4)?;
    let message_type: Option<String> = row.get(2)?;
    Ok(HistoryRecord {
        message: row.get(0)?,
        response: row.get(1)?,
        message_type: message_type.as_deref().and_then(|t| match t {
            "voice" => Some(MessageType::Voice),
            "text" => Some(MessageType::Text),
            _ => None,
        }),
        response_type: row.get(3)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, _token: &str, record: &HistoryRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO history (message, response, message_type, response_type, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.message,
                    record.response,
                    record.message_type.map(MessageType::as_str),
                    record.response_type,
                    record.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_recent(&self, _token: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message, response, message_type, response_type, timestamp
                 FROM history ORDER BY id DESC LIMIT ?1",
            )?;
            let mut records = stmt
                .query_map(params![limit], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            records.reverse();
            Ok(records)
        })
        .await
    }

    async fn clear(&self, _token: &str) -> Result<()> {
        self.run(|conn| {
            let removed = conn.execute("DELETE FROM history", [])?;
            debug!("removed {removed} stored exchanges");
            Ok(())
        })
        .await
    }
}
