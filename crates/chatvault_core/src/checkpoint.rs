/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::durability::CheckpointMode;
use crate::message_db::MessageDb;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CheckpointConfig {
    pub interval_secs: Option<u64>,
    /// Past this many WAL frames a passive pass escalates to a truncating
    /// checkpoint to reclaim the file.
    pub wal_truncate_threshold_pages: Option<i64>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(60),
            wal_truncate_threshold_pages: Some(4000),
        }
    }
}

/// Periodic WAL maintenance. Runs outside any request handling, on its own
/// connections, with the same non-destructive checkpoint discipline as a
/// manual trigger: it merges and reclaims the journal, it never touches
/// committed rows.
pub fn start_checkpoint_worker(
    cfg: CheckpointConfig,
    db: MessageDb,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let interval = cfg.interval_secs.unwrap_or(60).max(5);
        let mut tick = tokio::time::interval(Duration::from_secs(interval));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = run_once(&cfg, &db).await {
                warn!("checkpoint worker error: {e:#}");
            }
        }
    });
}

async fn run_once(cfg: &CheckpointConfig, db: &MessageDb) -> Result<()> {
    let stats = tokio::task::spawn_blocking({
        let db = db.clone();
        move || db.checkpoint(CheckpointMode::Passive)
    })
    .await??;
    if stats.checkpointed_pages > 0 {
        info!(
            log = stats.log_pages,
            checkpointed = stats.checkpointed_pages,
            busy = stats.busy,
            "passive wal checkpoint"
        );
    }

    let threshold = cfg.wal_truncate_threshold_pages.unwrap_or(4000).max(100);
    if stats.log_pages > threshold {
        warn!(frames = stats.log_pages, threshold, "large wal, truncating");
        let stats = tokio::task::spawn_blocking({
            let db = db.clone();
            move || db.checkpoint(CheckpointMode::Truncate)
        })
        .await??;
        info!(
            log = stats.log_pages,
            checkpointed = stats.checkpointed_pages,
            busy = stats.busy,
            "truncate wal checkpoint"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::DurabilityConfig;
    use crate::message_db::{MessageDraft, SenderRole};

    #[tokio::test]
    async fn scheduler_pass_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = MessageDb::open(dir.path().join("store.db"), DurabilityConfig::default())
            .unwrap();
        let thread = db
            .get_or_create_thread("wechat", "acct", "peer", "客户")
            .unwrap();
        let drafts: Vec<MessageDraft> = (0..20)
            .map(|i| MessageDraft {
                sender: SenderRole::User,
                remote_message_id: None,
                text: Some(format!("消息 {i}")),
                images: Vec::new(),
                source_timestamp_ms: 1_755_600_000_000,
            })
            .collect();
        db.insert_batch(thread.id, &drafts).unwrap();
        let before = db.message_count().unwrap();

        run_once(&CheckpointConfig::default(), &db).await.unwrap();

        assert_eq!(db.message_count().unwrap(), before);
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let db = MessageDb::open(dir.path().join("store.db"), DurabilityConfig::default())
            .unwrap();
        let (tx, rx) = watch::channel(false);
        start_checkpoint_worker(
            CheckpointConfig {
                interval_secs: Some(3600),
                ..CheckpointConfig::default()
            },
            db,
            rx,
        );
        tx.send(true).unwrap();
        // The worker observes the flag on its next poll; dropping the
        // sender after signalling must not wedge the runtime.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
