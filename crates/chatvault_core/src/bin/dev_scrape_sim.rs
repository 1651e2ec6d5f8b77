/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};

use chatvault_core::durability::DurabilityConfig;
use chatvault_core::ingest::{ingest_scrape, ThreadIdentity};
use chatvault_core::message_db::{MessageDb, MessageDraft, SenderRole};

fn draft(sender: SenderRole, text: &str) -> MessageDraft {
    MessageDraft {
        sender,
        remote_message_id: None,
        text: Some(text.to_string()),
        images: Vec::new(),
        source_timestamp_ms: now_ms(),
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let db_path = std::env::var("CHATVAULT_DB").context("missing CHATVAULT_DB (path to store file)")?;
    let db = MessageDb::open(&db_path, DurabilityConfig::default())
        .with_context(|| format!("open store: {db_path}"))?;

    let identity = ThreadIdentity {
        platform: "wechat".to_string(),
        account_id: "dev_account".to_string(),
        peer_user_id: "dev_peer".to_string(),
        display_name: "模拟会话".to_string(),
    };
    let batch = vec![
        draft(SenderRole::User, "你的电话"),
        draft(SenderRole::User, "[呲牙]"),
        draft(SenderRole::Me, "好"),
        draft(SenderRole::User, "好"),
        draft(SenderRole::Me, "测试"),
        draft(SenderRole::User, "我今天生病还要测试"),
    ];

    for round in 1..=2 {
        let report = ingest_scrape(&db, &identity, &batch)?;
        println!(
            "round {round}: inserted={} duplicates={} unread={}",
            report.inserted_count(),
            report.duplicate_count(),
            report.thread.unread_count
        );
        for (i, outcome) in report.outcomes.iter().enumerate() {
            println!("  draft {i}: {outcome:?}");
        }
    }

    println!("messages total: {}", db.message_count()?);
    Ok(())
}
