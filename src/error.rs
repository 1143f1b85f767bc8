//! Error taxonomy for the FileSync core.
//!
//! Errors are classified by kind, not by call site, so the executor and
//! heartbeat can make retry/recovery decisions without knowing which
//! collaborator produced the failure.

use thiserror::Error;

use crate::model::FileId;

/// Errors surfaced by the default SQLite-backed [`crate::catalog::Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Unclassified database failure.
    Other,
}

impl CatalogDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Database(database_error) => classify_database_error(database_error.as_ref()),
            _ => Self::Other,
        }
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> CatalogDbErrorKind {
    let code = database_error.code();
    if matches!(code.as_deref(), Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")) {
        return CatalogDbErrorKind::BusyOrLocked;
    }
    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
    {
        return CatalogDbErrorKind::ConstraintViolation;
    }
    CatalogDbErrorKind::Other
}

/// Errors from the default catalog implementation.
#[derive(Debug, Error, Clone)]
pub enum CatalogError {
    #[error("catalog database error ({kind:?}): {message}")]
    Database {
        kind: CatalogDbErrorKind,
        message: String,
    },

    #[error("file not found in catalog: {0}")]
    FileNotFound(FileId),

    #[error("stream exhausted after {attempts} reconnect attempts: {last_error}")]
    StreamExhausted { attempts: u32, last_error: String },
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: CatalogDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

/// Errors returned by a [`crate::executor::TransferHandler`] when an upload
/// or download fails. Classified by the handler, not the executor — the
/// executor is indifferent to network-vs-data causes.
#[derive(Debug, Error, Clone)]
pub enum TransferError {
    /// Blob I/O failed but the remote endpoint is still reachable.
    #[error("transient transfer failure: {0}")]
    Transient(String),

    /// Blob I/O failed and the remote endpoint looks unreachable.
    #[error("connectivity lost: {0}")]
    Connectivity(String),

    /// The catalog record vanished or was tombstoned mid-transfer.
    #[error("file deleted during transfer")]
    FileGoneDuringTransfer,
}

impl TransferError {
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Errors returned from the CRUD-facing surface and the preprocessor hook.
#[derive(Debug, Error)]
pub enum FileSyncError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("local store error: {0}")]
    LocalStore(String),

    #[error("remote store error: {0}")]
    RemoteStore(String),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("preprocessor failed: {0}")]
    Preprocessor(String),
}
