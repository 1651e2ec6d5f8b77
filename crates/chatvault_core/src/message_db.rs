/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::durability::DurabilityConfig;
use crate::error::{Result, StoreError};
use crate::fingerprint::fingerprint;

/// Who authored a message, as seen from the scraped account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// The local account the scraper is logged in as.
    Me,
    /// The remote party of the conversation.
    User,
    /// Platform-generated notices.
    System,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Me => "me",
            SenderRole::User => "user",
            SenderRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "me" => Some(SenderRole::Me),
            "user" => Some(SenderRole::User),
            "system" => Some(SenderRole::System),
            _ => None,
        }
    }
}

impl ToSql for SenderRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SenderRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        SenderRole::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Mixed,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "mixed" => Some(ContentType::Mixed),
            _ => None,
        }
    }

    fn for_draft(draft: &MessageDraft) -> Self {
        let has_text = draft.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        match (has_text, draft.images.is_empty()) {
            (true, true) => ContentType::Text,
            (false, false) => ContentType::Image,
            _ => ContentType::Mixed,
        }
    }
}

impl ToSql for ContentType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ContentType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        ContentType::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// One scraped message before it has a store identity. Produced by the
/// scraping layer once per visible message, in on-screen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub sender: SenderRole,
    /// Platform-assigned id, when the platform exposes one. Advisory only;
    /// dedup never relies on it.
    pub remote_message_id: Option<String>,
    pub text: Option<String>,
    /// Image identifiers in on-screen order. Empty means none.
    pub images: Vec<String>,
    /// Source-reported event time, epoch milliseconds.
    pub source_timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub id: i64,
    pub platform: String,
    pub account_id: String,
    pub peer_user_id: String,
    pub display_name: String,
    pub unread_count: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread: Thread,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub thread_id: i64,
    pub remote_message_id: Option<String>,
    pub sender: SenderRole,
    pub content_type: ContentType,
    pub text_content: Option<String>,
    pub images: Vec<String>,
    pub content_hash: String,
    pub source_timestamp_ms: i64,
    pub is_read: bool,
}

/// Per-draft result of `insert_batch`, index-aligned with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The draft was new; carries the store-assigned message id.
    Inserted(i64),
    /// A message with the same fingerprint already existed in the thread;
    /// carries the existing row's id. No mutation was performed.
    AlreadyExists(i64),
}

impl BatchOutcome {
    pub fn id(&self) -> i64 {
        match self {
            BatchOutcome::Inserted(id) | BatchOutcome::AlreadyExists(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, BatchOutcome::Inserted(_))
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  platform TEXT NOT NULL,
  account_id TEXT NOT NULL,
  peer_user_id TEXT NOT NULL,
  display_name TEXT NOT NULL DEFAULT '',
  unread_count INTEGER NOT NULL DEFAULT 0,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL,
  UNIQUE(platform, account_id, peer_user_id)
);

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
  remote_message_id TEXT NULL,
  sender TEXT NOT NULL,
  content_type TEXT NOT NULL,
  text_content TEXT NULL,
  images TEXT NULL,
  content_hash TEXT NOT NULL,
  source_timestamp_ms INTEGER NOT NULL,
  is_read INTEGER NOT NULL DEFAULT 0,
  UNIQUE(thread_id, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id DESC);
"#;

/// Handle to the message store. Cheap to clone; every operation opens its
/// own connection with the pragmas from the [`DurabilityConfig`] captured
/// at open time, so no connection state leaks between callers.
#[derive(Clone)]
pub struct MessageDb {
    path: PathBuf,
    config: DurabilityConfig,
}

impl MessageDb {
    /// Open (or create) the store at `path`.
    ///
    /// Opening after an unclean shutdown replays any outstanding WAL
    /// frames before this returns; row counts observed through this handle
    /// are always post-replay. A failed integrity check surfaces as
    /// [`StoreError::Corruption`] and the store must not be written to.
    pub fn open(path: impl AsRef<Path>, config: DurabilityConfig) -> Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            config,
        };
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA)?;
        db.quick_check(&conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DurabilityConfig {
        &self.config
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        self.config.apply(&conn)?;
        Ok(conn)
    }

    pub(crate) fn quick_check(&self, conn: &Connection) -> Result<()> {
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |r| r.get(0))?;
        if verdict != "ok" {
            return Err(StoreError::Corruption(verdict));
        }
        Ok(())
    }

    /// Atomic insert-or-fetch on the natural key `(platform, account_id,
    /// peer_user_id)`. Concurrent calls for the same key resolve to exactly
    /// one row. A non-empty `display_name` refreshes an existing row.
    pub fn get_or_create_thread(
        &self,
        platform: &str,
        account_id: &str,
        peer_user_id: &str,
        display_name: &str,
    ) -> Result<Thread> {
        for (field, value) in [
            ("platform", platform),
            ("account_id", account_id),
            ("peer_user_id", peer_user_id),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::Validation(format!("empty {field}")));
            }
        }
        let conn = self.connect()?;
        let now = now_ms();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO threads
               (platform, account_id, peer_user_id, display_name, unread_count, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![platform, account_id, peer_user_id, display_name, now],
        )?;
        if changed == 0 && !display_name.trim().is_empty() {
            conn.execute(
                "UPDATE threads SET display_name=?4, updated_at_ms=?5
                 WHERE platform=?1 AND account_id=?2 AND peer_user_id=?3 AND display_name<>?4",
                params![platform, account_id, peer_user_id, display_name, now],
            )?;
        }
        let thread = conn
            .query_row(
                "SELECT id, platform, account_id, peer_user_id, display_name, unread_count, created_at_ms, updated_at_ms
                 FROM threads WHERE platform=?1 AND account_id=?2 AND peer_user_id=?3",
                params![platform, account_id, peer_user_id],
                thread_from_row,
            )?;
        Ok(thread)
    }

    pub fn get_thread(&self, thread_id: i64) -> Result<Option<Thread>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, platform, account_id, peer_user_id, display_name, unread_count, created_at_ms, updated_at_ms
             FROM threads WHERE id=?1",
            params![thread_id],
            thread_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Bump `updated_at_ms`, optionally rename the thread and/or adjust the
    /// unread counter. The counter never goes below zero.
    pub fn touch_thread(
        &self,
        thread_id: i64,
        display_name: Option<&str>,
        unread_delta: i64,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE threads SET
               updated_at_ms=?2,
               unread_count=MAX(0, unread_count + ?3),
               display_name=COALESCE(?4, display_name)
             WHERE id=?1",
            params![thread_id, now_ms(), unread_delta, display_name],
        )?;
        if changed == 0 {
            return Err(StoreError::Validation(format!("unknown thread id {thread_id}")));
        }
        Ok(())
    }

    /// Recently-updated-first thread listing with per-thread message counts.
    pub fn list_threads(&self, limit: u32) -> Result<Vec<ThreadSummary>> {
        let conn = self.connect()?;
        let limit = limit.clamp(1, 500) as i64;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.platform, t.account_id, t.peer_user_id, t.display_name,
                    t.unread_count, t.created_at_ms, t.updated_at_ms,
                    (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.id)
             FROM threads t
             ORDER BY t.updated_at_ms DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(ThreadSummary {
                thread: thread_from_row(row)?,
                message_count: row.get(8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Insert a batch of scraped drafts into `thread_id`, deduplicating on
    /// the per-draft fingerprint computed with the batch as context window.
    ///
    /// The whole batch runs in one IMMEDIATE write transaction: after this
    /// returns `Ok`, every outcome is committed; on any error nothing from
    /// the batch is visible. Each draft resolves to `Inserted` or, when its
    /// `(thread_id, fingerprint)` pair is already present, `AlreadyExists`
    /// with the existing id and no mutation. The owning thread's unread
    /// counter grows by the number of genuinely inserted remote-party
    /// messages, inside the same transaction.
    pub fn insert_batch(
        &self,
        thread_id: i64,
        drafts: &[MessageDraft],
    ) -> Result<Vec<BatchOutcome>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let known: Option<i64> = tx
            .query_row("SELECT id FROM threads WHERE id=?1", params![thread_id], |r| r.get(0))
            .optional()?;
        if known.is_none() {
            return Err(StoreError::Validation(format!("unknown thread id {thread_id}")));
        }

        let mut outcomes = Vec::with_capacity(drafts.len());
        let mut new_unread = 0i64;
        let mut inserted = 0usize;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO messages
                   (thread_id, remote_message_id, sender, content_type, text_content, images,
                    content_hash, source_timestamp_ms, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            )?;
            let mut existing = tx.prepare(
                "SELECT id FROM messages WHERE thread_id=?1 AND content_hash=?2",
            )?;
            for (index, draft) in drafts.iter().enumerate() {
                validate_draft(index, draft)?;
                let hash = fingerprint(thread_id, drafts, index);
                let images_json = encode_images(&draft.images)?;
                let changed = insert.execute(params![
                    thread_id,
                    draft.remote_message_id,
                    draft.sender,
                    ContentType::for_draft(draft),
                    draft.text,
                    images_json,
                    hash,
                    draft.source_timestamp_ms,
                ])?;
                if changed == 0 {
                    let id: i64 =
                        existing.query_row(params![thread_id, hash], |r| r.get(0))?;
                    outcomes.push(BatchOutcome::AlreadyExists(id));
                } else {
                    inserted += 1;
                    if draft.sender == SenderRole::User {
                        new_unread += 1;
                    }
                    outcomes.push(BatchOutcome::Inserted(tx.last_insert_rowid()));
                }
            }
        }
        if inserted > 0 {
            tx.execute(
                "UPDATE threads SET unread_count = unread_count + ?2, updated_at_ms = ?3 WHERE id=?1",
                params![thread_id, new_unread, now_ms()],
            )?;
        }
        tx.commit().map_err(StoreError::durability)?;
        tracing::debug!(thread_id, total = drafts.len(), inserted, "batch committed");
        Ok(outcomes)
    }

    /// Messages of a thread, newest first.
    pub fn list_recent_messages(&self, thread_id: i64, limit: u32) -> Result<Vec<MessageRow>> {
        let conn = self.connect()?;
        let limit = limit.clamp(1, 500) as i64;
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, remote_message_id, sender, content_type, text_content, images,
                    content_hash, source_timestamp_ms, is_read
             FROM messages WHERE thread_id=?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![thread_id, limit], message_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Zero the unread counter and flip the read flag on every message of
    /// the thread, atomically.
    pub fn mark_thread_read(&self, thread_id: i64) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE messages SET is_read=1 WHERE thread_id=?1 AND is_read=0",
            params![thread_id],
        )?;
        let changed = tx.execute(
            "UPDATE threads SET unread_count=0 WHERE id=?1",
            params![thread_id],
        )?;
        if changed == 0 {
            return Err(StoreError::Validation(format!("unknown thread id {thread_id}")));
        }
        tx.commit().map_err(StoreError::durability)?;
        Ok(())
    }

    /// Highest message id ever issued, including ids of deleted rows.
    /// External watermark caches stay valid across deletions.
    pub fn message_id_watermark(&self) -> Result<i64> {
        let conn = self.connect()?;
        let seq: Option<i64> = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name='messages'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    pub fn thread_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM threads", [], |r| r.get(0))
            .map_err(Into::into)
    }

    pub fn message_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .map_err(Into::into)
    }

    /// Administrative: drop a thread and, via the cascade, its messages.
    /// The scraping core itself never calls this.
    pub fn delete_thread(&self, thread_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM threads WHERE id=?1", params![thread_id])?;
        Ok(())
    }

    /// Administrative: delete every message while keeping the id sequence's
    /// high-water mark, so freed ids are never reissued.
    pub fn clear_messages(&self) -> Result<usize> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM messages", [])?;
        Ok(deleted)
    }
}

fn validate_draft(index: usize, draft: &MessageDraft) -> Result<()> {
    let has_text = draft.text.as_deref().is_some_and(|t| !t.trim().is_empty());
    if !has_text && draft.images.is_empty() {
        return Err(StoreError::Validation(format!(
            "draft {index} has neither text nor images"
        )));
    }
    Ok(())
}

fn encode_images(images: &[String]) -> Result<Option<String>> {
    if images.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(images)
        .map(Some)
        .map_err(|e| StoreError::Validation(format!("unencodable image list: {e}")))
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        platform: row.get(1)?,
        account_id: row.get(2)?,
        peer_user_id: row.get(3)?,
        display_name: row.get(4)?,
        unread_count: row.get(5)?,
        created_at_ms: row.get(6)?,
        updated_at_ms: row.get(7)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let images_json: Option<String> = row.get(6)?;
    Ok(MessageRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        remote_message_id: row.get(2)?,
        sender: row.get(3)?,
        content_type: row.get(4)?,
        text_content: row.get(5)?,
        images: images_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        content_hash: row.get(7)?,
        source_timestamp_ms: row.get(8)?,
        is_read: row.get::<_, i64>(9)? != 0,
    })
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
