//! Authoritative record persistence.
//!
//! The store is a collaborator behind a trait so tests (and future remote
//! backends) can substitute it. Each operation is individually atomic; no
//! two operations are assumed transactional together. The refresh broadcast
//! that follows a write is a separate, non-atomic step by design.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::error::SyncError;
use crate::record::{CollectionKey, Record, RecordId, RecordKind, RecordState};

/// Default timeout for individual SQLite queries.
/// Prevents a hung query from blocking a client indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Persistence(sqlx::Error::PoolTimedOut)),
    }
}

/// Persistence operations consumed by the sync core.
///
/// `insert` assigns the persisted identity; the record's local id is not
/// sent to the store at all. Local identities are store-incompatible on
/// purpose.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &Record) -> Result<Record, SyncError>;
    async fn update(&self, id: &str, content: &str) -> Result<(), SyncError>;
    async fn delete(&self, id: &str) -> Result<(), SyncError>;
    async fn list_by_parent(&self, key: &CollectionKey) -> Result<Vec<Record>, SyncError>;
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RecordRow {
    id: String,
    kind: String,
    parent_id: String,
    content: String,
    created_at: String,
}

impl RecordRow {
    fn into_record(self) -> Record {
        let kind = match self.kind.as_str() {
            "canvas_node" => RecordKind::CanvasNode,
            "session" => RecordKind::Session,
            "artifact" => RecordKind::Artifact,
            _ => RecordKind::Message,
        };
        Record {
            id: RecordId::Persisted(self.id),
            kind,
            parent_id: self.parent_id,
            content: self.content,
            // Everything in the store reached a clean end of stream.
            state: RecordState::Complete,
            created_at: self.created_at,
        }
    }
}

/// SQLite-backed record store, WAL mode for crash-safe persistence.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("trellis.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap, Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                 id TEXT PRIMARY KEY,
                 kind TEXT NOT NULL,
                 parent_id TEXT NOT NULL,
                 content TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_parent
             ON records (kind, parent_id, created_at)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, record: &Record) -> Result<Record, SyncError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO records (id, kind, parent_id, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(record.kind.as_str())
        .bind(&record.parent_id)
        .bind(&record.content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Record {
            id: RecordId::Persisted(id),
            kind: record.kind,
            parent_id: record.parent_id.clone(),
            content: record.content.clone(),
            state: RecordState::Complete,
            created_at: now,
        })
    }

    async fn update(&self, id: &str, content: &str) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE records SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_parent(&self, key: &CollectionKey) -> Result<Vec<Record>, SyncError> {
        with_timeout(async {
            // Composite (created_at, id) ordering so rows that share a
            // timestamp come back in a stable order on every fetch.
            let rows: Vec<RecordRow> = sqlx::query_as(
                "SELECT id, kind, parent_id, content, created_at FROM records
                 WHERE kind = ? AND parent_id = ?
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(key.kind.as_str())
            .bind(&key.parent_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(RecordRow::into_record).collect())
        })
        .await
    }
}
