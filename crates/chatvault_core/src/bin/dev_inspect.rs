/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde_json::json;

use chatvault_core::durability::DurabilityConfig;
use chatvault_core::message_db::MessageDb;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let db_path = std::env::var("CHATVAULT_DB").context("missing CHATVAULT_DB (path to store file)")?;
    let db = MessageDb::open(&db_path, DurabilityConfig::default())
        .with_context(|| format!("open store: {db_path}"))?;

    let wal = db.wal_stats()?;
    let integrity = match db.integrity_check() {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "path": db_path,
            "config": db.config(),
            "files": wal,
            "integrity": integrity,
            "threads": db.thread_count()?,
            "messages": db.message_count()?,
            "message_id_watermark": db.message_id_watermark()?,
        }))?
    );

    for summary in db.list_threads(20)? {
        println!("{}", serde_json::to_string(&summary)?);
        for msg in db.list_recent_messages(summary.thread.id, 5)? {
            println!("  {}", serde_json::to_string(&msg)?);
        }
    }
    Ok(())
}
