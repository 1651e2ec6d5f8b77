/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the store.
///
/// A duplicate draft is NOT an error: `insert_batch` resolves it to an
/// [`AlreadyExists`](crate::message_db::BatchOutcome::AlreadyExists)
/// outcome. Errors are classified by SQLite result code, never by
/// matching on message text.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input: empty natural-key component, unknown thread,
    /// draft with neither text nor images.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The write lock was not acquired within the configured
    /// `busy_timeout`. Retryable; the caller may re-run the whole batch.
    #[error("store busy: write lock not acquired within busy_timeout")]
    TransientBusy,

    /// A commit or checkpoint failed to reach stable storage. Fatal for
    /// the batch; always propagated, never swallowed.
    #[error("durability failure: {0}")]
    Durability(#[source] rusqlite::Error),

    /// The integrity check failed. The store refuses writes until an
    /// operator resolves it.
    #[error("store corruption: {0}")]
    Corruption(String),

    /// Any other storage-level error.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::TransientBusy)
    }

    /// Reclassify an error raised by a commit or checkpoint: anything that
    /// is not contention is a durability failure.
    pub(crate) fn durability(e: rusqlite::Error) -> StoreError {
        match StoreError::from(e) {
            StoreError::Sqlite(e) => StoreError::Durability(e),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::TransientBusy
            }
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                StoreError::Corruption(e.to_string())
            }
            _ => StoreError::Sqlite(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_code_maps_to_transient() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StoreError::from(e), StoreError::TransientBusy));
    }

    #[test]
    fn corrupt_code_maps_to_corruption() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        );
        assert!(matches!(StoreError::from(e), StoreError::Corruption(_)));
    }

    #[test]
    fn commit_errors_reclassify_to_durability() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            None,
        );
        assert!(matches!(
            StoreError::durability(e),
            StoreError::Durability(_)
        ));
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(
            StoreError::durability(busy),
            StoreError::TransientBusy
        ));
    }
}
