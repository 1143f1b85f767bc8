//! Default `SQLite`-backed [`Catalog`] implementation.
//!
//! Mirrors the teacher's queue repository: every mutation is a single
//! transaction that appends a row to the event log and applies the same
//! change to the materialized projection table, so the two can never drift.
//! Polling-based `subscribe` stands in for a push subscription — the core
//! only requires an ordered, gap-free stream, not low latency.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures_util::stream;
use sqlx::sqlite::SqlitePool;
use tokio::time::{sleep, Duration};
use tracing::instrument;

use crate::db::Database;
use crate::error::{CatalogDbErrorKind, CatalogError};
use crate::model::{CatalogEvent, CatalogEventKind, FileId, FileRecord, StateEntry};
use crate::traits::{Catalog, CatalogEventStream};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const EVENT_BATCH_SIZE: i64 = 64;

fn json_error(err: serde_json::Error) -> CatalogError {
    CatalogError::Database {
        kind: CatalogDbErrorKind::Other,
        message: err.to_string(),
    }
}

#[derive(sqlx::FromRow)]
struct FileRow {
    file_id: String,
    path: String,
    content_hash: String,
    remote_key: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            file_id: row.file_id,
            path: row.path,
            content_hash: row.content_hash,
            remote_key: row.remote_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StateRow {
    file_id: String,
    path: String,
    local_hash: String,
    upload_status: String,
    download_status: String,
    last_sync_error: String,
}

impl StateRow {
    fn into_entry(self) -> Result<(FileId, StateEntry), CatalogError> {
        use std::str::FromStr;
        let upload_status = crate::model::TransferStatus::from_str(&self.upload_status)
            .map_err(|message| CatalogError::Database {
                kind: CatalogDbErrorKind::Other,
                message,
            })?;
        let download_status = crate::model::TransferStatus::from_str(&self.download_status)
            .map_err(|message| CatalogError::Database {
                kind: CatalogDbErrorKind::Other,
                message,
            })?;
        Ok((
            self.file_id,
            StateEntry {
                path: self.path,
                local_hash: self.local_hash,
                upload_status,
                download_status,
                last_sync_error: self.last_sync_error,
            },
        ))
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    sequence: i64,
    payload: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StateUpsertPayload {
    file_id: FileId,
    entry: StateEntry,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StateRemovePayload {
    file_id: FileId,
}

async fn fetch_event_batch(
    pool: &SqlitePool,
    since: i64,
    limit: i64,
) -> Result<Vec<CatalogEvent>, CatalogError> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT sequence, payload FROM catalog_events \
         WHERE sequence > ? AND kind IN ('file_created', 'file_updated', 'file_deleted') \
         ORDER BY sequence LIMIT ?",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let kind: CatalogEventKind = serde_json::from_str(&row.payload).map_err(json_error)?;
            Ok(CatalogEvent {
                sequence: row.sequence,
                kind,
            })
        })
        .collect()
}

/// Default `Catalog` implementation, backed by the `SQLite` schema in
/// `./migrations`.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    #[instrument(skip(self))]
    async fn commit_file_created(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
    ) -> Result<FileRecord, CatalogError> {
        let mut tx = self.pool.begin().await?;

        let kind = CatalogEventKind::FileCreated {
            file_id: file_id.clone(),
            path: path.to_string(),
            content_hash: content_hash.to_string(),
        };
        let payload = serde_json::to_string(&kind).map_err(json_error)?;
        sqlx::query(
            "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('file_created', ?, ?)",
        )
        .bind(file_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO files (file_id, path, content_hash, remote_key, created_at, updated_at) \
             VALUES (?, ?, ?, '', datetime('now'), datetime('now'))",
        )
        .bind(file_id)
        .bind(path)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        let row: FileRow = sqlx::query_as("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn commit_file_updated(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
        remote_key: Option<&str>,
    ) -> Result<FileRecord, CatalogError> {
        let mut tx = self.pool.begin().await?;
        let remote_key = remote_key.unwrap_or("");

        let kind = CatalogEventKind::FileUpdated {
            file_id: file_id.clone(),
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            remote_key: remote_key.to_string(),
        };
        let payload = serde_json::to_string(&kind).map_err(json_error)?;
        sqlx::query(
            "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('file_updated', ?, ?)",
        )
        .bind(file_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        let row: FileRow = sqlx::query_as(
            "UPDATE files SET path = ?, content_hash = ?, remote_key = ?, \
             updated_at = datetime('now') WHERE file_id = ? RETURNING *",
        )
        .bind(path)
        .bind(content_hash)
        .bind(remote_key)
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CatalogError::FileNotFound(file_id.clone()))?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn commit_remote_key(
        &self,
        file_id: &FileId,
        remote_key: &str,
    ) -> Result<FileRecord, CatalogError> {
        let existing = self
            .get_file(file_id)
            .await?
            .ok_or_else(|| CatalogError::FileNotFound(file_id.clone()))?;

        let mut tx = self.pool.begin().await?;

        let kind = CatalogEventKind::FileUpdated {
            file_id: file_id.clone(),
            path: existing.path.clone(),
            content_hash: existing.content_hash.clone(),
            remote_key: remote_key.to_string(),
        };
        let payload = serde_json::to_string(&kind).map_err(json_error)?;
        sqlx::query(
            "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('file_updated', ?, ?)",
        )
        .bind(file_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        let row: FileRow = sqlx::query_as(
            "UPDATE files SET remote_key = ?, updated_at = datetime('now') \
             WHERE file_id = ? RETURNING *",
        )
        .bind(remote_key)
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CatalogError::FileNotFound(file_id.clone()))?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn commit_file_deleted(&self, file_id: &FileId) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;

        let (now,): (String,) = sqlx::query_as("SELECT datetime('now')")
            .fetch_one(&mut *tx)
            .await?;

        let kind = CatalogEventKind::FileDeleted {
            file_id: file_id.clone(),
            deleted_at: now.clone(),
        };
        let payload = serde_json::to_string(&kind).map_err(json_error)?;
        sqlx::query(
            "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('file_deleted', ?, ?)",
        )
        .bind(file_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE files SET deleted_at = ?, updated_at = ? WHERE file_id = ?")
            .bind(&now)
            .bind(&now)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_file(&self, file_id: &FileId) -> Result<Option<FileRecord>, CatalogError> {
        let row: Option<FileRow> = sqlx::query_as("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn snapshot(&self) -> Result<Vec<FileRecord>, CatalogError> {
        let rows: Vec<FileRow> =
            sqlx::query_as("SELECT * FROM files WHERE deleted_at IS NULL ORDER BY file_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn current_head(&self) -> Result<i64, CatalogError> {
        let (head,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM catalog_events")
                .fetch_one(&self.pool)
                .await?;
        Ok(head)
    }

    async fn subscribe(&self, since: i64) -> Result<CatalogEventStream, CatalogError> {
        struct State {
            pool: SqlitePool,
            cursor: i64,
            buffer: VecDeque<CatalogEvent>,
        }

        let state = State {
            pool: self.pool.clone(),
            cursor: since,
            buffer: VecDeque::new(),
        };

        let generated = stream::unfold(state, move |mut state| async move {
            loop {
                if let Some(event) = state.buffer.pop_front() {
                    state.cursor = event.sequence;
                    return Some((Ok(event), state));
                }
                match fetch_event_batch(&state.pool, state.cursor, EVENT_BATCH_SIZE).await {
                    Ok(batch) if batch.is_empty() => sleep(POLL_INTERVAL).await,
                    Ok(batch) => state.buffer.extend(batch),
                    Err(err) => return Some((Err(err), state)),
                }
            }
        });

        Ok(Box::pin(generated))
    }

    async fn commit_cursor(&self, sequence: i64) -> Result<(), CatalogError> {
        sqlx::query(
            "UPDATE sync_cursor SET last_event_sequence = ?, updated_at = datetime('now') \
             WHERE id = 0",
        )
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cursor(&self) -> Result<i64, CatalogError> {
        let (sequence,): (i64,) =
            sqlx::query_as("SELECT last_event_sequence FROM sync_cursor WHERE id = 0")
                .fetch_one(&self.pool)
                .await?;
        Ok(sequence)
    }

    async fn get_state(&self) -> Result<HashMap<FileId, StateEntry>, CatalogError> {
        let rows: Vec<StateRow> = sqlx::query_as("SELECT * FROM sync_state")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StateRow::into_entry).collect()
    }

    async fn commit_state_upsert(
        &self,
        file_id: &FileId,
        entry: &StateEntry,
    ) -> Result<(), CatalogError> {
        self.commit_state_batch(&[(file_id.clone(), entry.clone())], &[])
            .await
    }

    async fn commit_state_batch(
        &self,
        upserts: &[(FileId, StateEntry)],
        removals: &[FileId],
    ) -> Result<(), CatalogError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for (file_id, entry) in upserts {
            let payload = serde_json::to_string(&StateUpsertPayload {
                file_id: file_id.clone(),
                entry: entry.clone(),
            })
            .map_err(json_error)?;
            sqlx::query(
                "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('state_upsert', ?, ?)",
            )
            .bind(file_id)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO sync_state \
                 (file_id, path, local_hash, upload_status, download_status, last_sync_error) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(file_id) DO UPDATE SET \
                 path = excluded.path, local_hash = excluded.local_hash, \
                 upload_status = excluded.upload_status, \
                 download_status = excluded.download_status, \
                 last_sync_error = excluded.last_sync_error",
            )
            .bind(file_id)
            .bind(&entry.path)
            .bind(&entry.local_hash)
            .bind(entry.upload_status.as_str())
            .bind(entry.download_status.as_str())
            .bind(&entry.last_sync_error)
            .execute(&mut *tx)
            .await?;
        }

        for file_id in removals {
            let payload = serde_json::to_string(&StateRemovePayload {
                file_id: file_id.clone(),
            })
            .map_err(json_error)?;
            sqlx::query(
                "INSERT INTO catalog_events (kind, file_id, payload) VALUES ('state_remove', ?, ?)",
            )
            .bind(file_id)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM sync_state WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_state_remove(&self, file_id: &FileId) -> Result<(), CatalogError> {
        self.commit_state_batch(&[], &[file_id.clone()]).await
    }
}
