/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::message_db::{BatchOutcome, MessageDb, MessageDraft, Thread};

/// Natural identity of a conversation as the scraping layer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadIdentity {
    pub platform: String,
    pub account_id: String,
    pub peer_user_id: String,
    pub display_name: String,
}

/// Result of one scrape cycle: the resolved thread plus one outcome per
/// draft, index-aligned with the input batch.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub thread: Thread,
    pub outcomes: Vec<BatchOutcome>,
}

impl ScrapeReport {
    pub fn inserted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_inserted()).count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.outcomes.len() - self.inserted_count()
    }
}

const INSERT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Entry point for the scraping layer: resolve the thread by natural key,
/// then insert the batch exactly once.
///
/// Drafts are validated up front; a malformed draft fails the whole call
/// before anything is written. Lock contention is retried with backoff up
/// to [`INSERT_ATTEMPTS`] times, then surfaced as
/// [`StoreError::TransientBusy`]; durability and corruption errors are
/// never retried and never swallowed.
pub fn ingest_scrape(
    db: &MessageDb,
    identity: &ThreadIdentity,
    drafts: &[MessageDraft],
) -> Result<ScrapeReport> {
    validate_drafts(drafts)?;
    let thread = db.get_or_create_thread(
        &identity.platform,
        &identity.account_id,
        &identity.peer_user_id,
        &identity.display_name,
    )?;
    let outcomes = insert_with_retry(db, thread.id, drafts)?;
    // Re-read so the report carries the post-batch unread counter.
    let thread = db.get_thread(thread.id)?.unwrap_or(thread);
    Ok(ScrapeReport { thread, outcomes })
}

fn validate_drafts(drafts: &[MessageDraft]) -> Result<()> {
    for (i, draft) in drafts.iter().enumerate() {
        let has_text = draft.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_text && draft.images.is_empty() {
            return Err(StoreError::Validation(format!(
                "draft {i} has neither text nor images"
            )));
        }
    }
    Ok(())
}

fn insert_with_retry(
    db: &MessageDb,
    thread_id: i64,
    drafts: &[MessageDraft],
) -> Result<Vec<BatchOutcome>> {
    let mut backoff = INITIAL_BACKOFF;
    for attempt in 0..INSERT_ATTEMPTS {
        match db.insert_batch(thread_id, drafts) {
            Err(StoreError::TransientBusy) if attempt + 1 < INSERT_ATTEMPTS => {
                warn!(thread_id, attempt, "store busy, retrying batch");
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
            other => return other,
        }
    }
    unreachable!("retry loop should return or error");
}
