/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::message_db::MessageDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: writers do not block readers; commits land in the
    /// `-wal` sidecar until a checkpoint merges them into the main file.
    Wal,
    Delete,
    Truncate,
    Memory,
}

impl JournalMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// No fsync on commit. A power loss can drop recently committed
    /// batches; a plain process crash cannot.
    Off,
    /// Fsync at WAL-checkpoint boundaries. With WAL journaling a process
    /// crash loses nothing; an OS crash or power loss can lose commits
    /// since the last sync. This is a policy choice, stated here rather
    /// than assumed.
    Normal,
    /// Fsync on every commit.
    Full,
}

impl Synchronous {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Immutable durability settings, captured once when the store is opened
/// and applied to every connection it hands out. There is no process-wide
/// pragma state anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurabilityConfig {
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    /// Auto-checkpoint after this many WAL pages. Zero disables automatic
    /// checkpoints; the scheduler or an explicit call must run them.
    pub wal_autocheckpoint_pages: u32,
    /// Bounded wait for the write lock. Exhaustion surfaces as
    /// [`StoreError::TransientBusy`].
    pub busy_timeout_ms: u64,
    pub cache_size_pages: u32,
    pub temp_store_memory: bool,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            wal_autocheckpoint_pages: 1000,
            busy_timeout_ms: 5000,
            cache_size_pages: 1000,
            temp_store_memory: true,
        }
    }
}

impl DurabilityConfig {
    pub(crate) fn apply(&self, conn: &Connection) -> Result<()> {
        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms))?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys=ON;
             PRAGMA journal_mode={};
             PRAGMA synchronous={};
             PRAGMA wal_autocheckpoint={};
             PRAGMA cache_size={};
             PRAGMA temp_store={};",
            self.journal_mode.as_sql(),
            self.synchronous.as_sql(),
            self.wal_autocheckpoint_pages,
            self.cache_size_pages,
            if self.temp_store_memory { "memory" } else { "default" },
        ))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// Merge as much of the WAL as possible without blocking anyone.
    Passive,
    /// Wait for readers, then merge the whole WAL.
    Full,
    /// As `Full`, and also block new writers until the WAL is restarted.
    Restart,
    /// As `Restart`, and also truncate the WAL file.
    Truncate,
}

impl CheckpointMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PASSIVE",
            CheckpointMode::Full => "FULL",
            CheckpointMode::Restart => "RESTART",
            CheckpointMode::Truncate => "TRUNCATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "passive" => Some(CheckpointMode::Passive),
            "full" => Some(CheckpointMode::Full),
            "restart" => Some(CheckpointMode::Restart),
            "truncate" => Some(CheckpointMode::Truncate),
            _ => None,
        }
    }
}

/// Result row of `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckpointStats {
    /// 1 when the checkpoint could not complete because of contention.
    pub busy: i64,
    /// WAL frames at checkpoint time.
    pub log_pages: i64,
    /// Frames actually moved into the main file.
    pub checkpointed_pages: i64,
}

/// On-disk footprint of the store and its WAL sidecars.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WalStats {
    pub db_bytes: u64,
    pub wal_bytes: Option<u64>,
    pub shm_bytes: Option<u64>,
}

impl MessageDb {
    /// Merge the WAL into the main store file.
    ///
    /// A checkpoint only ever reduces the journal; it can never reduce the
    /// committed logical row count. Runs on a dedicated connection and is
    /// never issued inside a write transaction. Failures surface as
    /// [`StoreError::Durability`].
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointStats> {
        let conn = self.connect()?;
        let stats = conn
            .query_row(
                &format!("PRAGMA wal_checkpoint({})", mode.as_sql()),
                [],
                |row| {
                    Ok(CheckpointStats {
                        busy: row.get(0)?,
                        log_pages: row.get(1)?,
                        checkpointed_pages: row.get(2)?,
                    })
                },
            )
            .map_err(StoreError::durability)?;
        tracing::debug!(
            mode = mode.as_sql(),
            busy = stats.busy,
            log = stats.log_pages,
            checkpointed = stats.checkpointed_pages,
            "wal checkpoint"
        );
        Ok(stats)
    }

    /// Full integrity check. `Err(Corruption)` means the store must not be
    /// written to until an operator intervenes.
    pub fn integrity_check(&self) -> Result<()> {
        let conn = self.connect()?;
        let verdict: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        if verdict != "ok" {
            return Err(StoreError::Corruption(verdict));
        }
        Ok(())
    }

    pub fn wal_stats(&self) -> Result<WalStats> {
        let db_bytes = std::fs::metadata(self.path())
            .map(|m| m.len())
            .unwrap_or(0);
        let sidecar = |suffix: &str| -> Option<u64> {
            std::fs::metadata(format!("{}{suffix}", self.path().display()))
                .ok()
                .map(|m| m.len())
        };
        Ok(WalStats {
            db_bytes,
            wal_bytes: sidecar("-wal"),
            shm_bytes: sidecar("-shm"),
        })
    }

    /// Consistent snapshot of the store into `dest`, via SQLite's online
    /// backup API. Safe against concurrent writers.
    pub fn backup_to(&self, dest: impl AsRef<Path>) -> Result<()> {
        let src = self.connect()?;
        let mut dst = Connection::open(dest.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&src, &mut dst)
            .map_err(StoreError::durability)?;
        backup
            .run_to_completion(100, Duration::from_millis(10), None)
            .map_err(StoreError::durability)?;
        Ok(())
    }

    /// Post-incident housekeeping: query-planner statistics refresh.
    pub fn optimize(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA optimize; ANALYZE;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_db::{MessageDraft, SenderRole};
    use tempfile::TempDir;

    fn test_db_with(config: DurabilityConfig) -> (TempDir, MessageDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = MessageDb::open(dir.path().join("store.db"), config).expect("open");
        (dir, db)
    }

    fn seed(db: &MessageDb, n: usize) -> i64 {
        let thread = db
            .get_or_create_thread("wechat", "acct", "peer", "客户")
            .unwrap();
        let drafts: Vec<MessageDraft> = (0..n)
            .map(|i| MessageDraft {
                sender: SenderRole::User,
                remote_message_id: None,
                text: Some(format!("消息 {i}")),
                images: Vec::new(),
                source_timestamp_ms: 1_755_600_000_000,
            })
            .collect();
        db.insert_batch(thread.id, &drafts).unwrap();
        thread.id
    }

    #[test]
    fn pragmas_reflect_the_config() {
        let (_dir, db) = test_db_with(DurabilityConfig::default());
        let conn = db.connect().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
        let sync: i64 = conn.query_row("PRAGMA synchronous", [], |r| r.get(0)).unwrap();
        assert_eq!(sync, 1); // NORMAL
        let auto: i64 = conn
            .query_row("PRAGMA wal_autocheckpoint", [], |r| r.get(0))
            .unwrap();
        assert_eq!(auto, 1000);
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn rollback_journal_mode_also_works() {
        let (_dir, db) = test_db_with(DurabilityConfig {
            journal_mode: JournalMode::Delete,
            ..DurabilityConfig::default()
        });
        seed(&db, 4);
        assert_eq!(db.message_count().unwrap(), 4);
        assert!(db.wal_stats().unwrap().wal_bytes.is_none());
    }

    #[test]
    fn checkpoint_never_loses_committed_rows() {
        let (_dir, db) = test_db_with(DurabilityConfig::default());
        // Keep one connection open so the WAL is not merged early by a
        // close-time checkpoint.
        let _pin = db.connect().unwrap();
        let thread_id = seed(&db, 25);
        let before = db.message_count().unwrap();

        for mode in [
            CheckpointMode::Passive,
            CheckpointMode::Full,
            CheckpointMode::Restart,
            CheckpointMode::Truncate,
        ] {
            let stats = db.checkpoint(mode).unwrap();
            assert_eq!(stats.busy, 0);
            let after = db.message_count().unwrap();
            assert!(after >= before, "{mode:?} dropped rows: {before} -> {after}");
        }
        assert_eq!(db.list_recent_messages(thread_id, 100).unwrap().len(), 25);
    }

    #[test]
    fn commits_survive_reopen_without_explicit_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let db = MessageDb::open(&path, DurabilityConfig::default()).unwrap();
            let _pin = db.connect().unwrap();
            seed(&db, 10);
            // No checkpoint yet: the rows live in the WAL sidecar.
            assert!(db.wal_stats().unwrap().wal_bytes.unwrap_or(0) > 0);
        }
        let reopened = MessageDb::open(&path, DurabilityConfig::default()).unwrap();
        assert_eq!(reopened.message_count().unwrap(), 10);
    }

    #[test]
    fn truncate_checkpoint_drains_the_wal() {
        let (_dir, db) = test_db_with(DurabilityConfig::default());
        let _pin = db.connect().unwrap();
        seed(&db, 25);
        assert!(db.wal_stats().unwrap().wal_bytes.unwrap_or(0) > 0);
        db.checkpoint(CheckpointMode::Truncate).unwrap();
        assert_eq!(db.wal_stats().unwrap().wal_bytes.unwrap_or(0), 0);
        assert_eq!(db.message_count().unwrap(), 25);
    }

    #[test]
    fn second_handle_sees_committed_batch() {
        let (_dir, db) = test_db_with(DurabilityConfig::default());
        seed(&db, 6);
        let other = MessageDb::open(db.path(), db.config().clone()).unwrap();
        assert_eq!(other.message_count().unwrap(), 6);
    }

    #[test]
    fn backup_produces_an_openable_copy() {
        let (dir, db) = test_db_with(DurabilityConfig::default());
        seed(&db, 8);
        let dest = dir.path().join("backup.db");
        db.backup_to(&dest).unwrap();
        let copy = MessageDb::open(&dest, DurabilityConfig::default()).unwrap();
        assert_eq!(copy.message_count().unwrap(), 8);
    }

    #[test]
    fn integrity_check_passes_on_healthy_store() {
        let (_dir, db) = test_db_with(DurabilityConfig::default());
        seed(&db, 3);
        db.integrity_check().unwrap();
        db.optimize().unwrap();
    }
}
