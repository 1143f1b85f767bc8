//! Shared data types for the catalog, state store, and executor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque catalog file identifier.
pub type FileId = String;

/// A file record as materialized from the catalog. Read-only from the
/// core's perspective — the core only submits well-typed events that
/// mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    /// Content-addressed storage location, `store_root/files/<content_hash>`.
    pub path: String,
    /// Hex digest of the canonical bytes.
    pub content_hash: String,
    /// Empty means "not yet uploaded".
    pub remote_key: String,
    pub created_at: String,
    pub updated_at: String,
    /// Presence marks a tombstone.
    pub deleted_at: Option<String>,
}

impl FileRecord {
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn has_remote_key(&self) -> bool {
        !self.remote_key.is_empty()
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Per-direction transfer status for a file's state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Queued,
    InProgress,
    Done,
    Error,
}

impl TransferStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// An active status a reconciler must never clobber back to `pending`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid transfer status: {s}")),
        }
    }
}

/// Local File State Entry (core-owned, per client), keyed by `file_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub path: String,
    /// Hash of bytes present in the local store; empty if none.
    pub local_hash: String,
    pub upload_status: TransferStatus,
    pub download_status: TransferStatus,
    /// Empty unless the relevant status is `error`.
    pub last_sync_error: String,
}

impl StateEntry {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            local_hash: String::new(),
            upload_status: TransferStatus::Pending,
            download_status: TransferStatus::Pending,
            last_sync_error: String::new(),
        }
    }

    #[must_use]
    pub fn status(&self, direction: TransferDirection) -> TransferStatus {
        match direction {
            TransferDirection::Upload => self.upload_status,
            TransferDirection::Download => self.download_status,
        }
    }

    pub fn set_status(&mut self, direction: TransferDirection, status: TransferStatus) {
        match direction {
            TransferDirection::Upload => self.upload_status = status,
            TransferDirection::Download => self.download_status = status,
        }
    }
}

/// A single catalog event as delivered by the filtered subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub sequence: i64,
    pub kind: CatalogEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEventKind {
    FileCreated {
        file_id: FileId,
        path: String,
        content_hash: String,
    },
    FileUpdated {
        file_id: FileId,
        path: String,
        content_hash: String,
        remote_key: String,
    },
    FileDeleted {
        file_id: FileId,
        deleted_at: String,
    },
}

impl CatalogEventKind {
    #[must_use]
    pub fn file_id(&self) -> &FileId {
        match self {
            Self::FileCreated { file_id, .. }
            | Self::FileUpdated { file_id, .. }
            | Self::FileDeleted { file_id, .. } => file_id,
        }
    }
}
