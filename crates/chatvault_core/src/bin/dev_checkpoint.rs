/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};

use chatvault_core::durability::{CheckpointMode, DurabilityConfig};
use chatvault_core::message_db::MessageDb;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let db_path = std::env::var("CHATVAULT_DB").context("missing CHATVAULT_DB (path to store file)")?;
    let mode = std::env::var("CHATVAULT_MODE").unwrap_or_else(|_| "passive".to_string());
    let mode = CheckpointMode::parse(&mode)
        .with_context(|| format!("unknown checkpoint mode: {mode} (passive|full|restart|truncate)"))?;

    let db = MessageDb::open(&db_path, DurabilityConfig::default())
        .with_context(|| format!("open store: {db_path}"))?;

    let before = db.message_count()?;
    let wal_before = db.wal_stats()?;
    let stats = db.checkpoint(mode)?;
    let after = db.message_count()?;
    let wal_after = db.wal_stats()?;

    println!("mode:         {}", mode.as_sql());
    println!(
        "result:       busy={} log={} checkpointed={}",
        stats.busy, stats.log_pages, stats.checkpointed_pages
    );
    println!("messages:     {before} -> {after}");
    println!(
        "wal bytes:    {} -> {}",
        wal_before.wal_bytes.unwrap_or(0),
        wal_after.wal_bytes.unwrap_or(0)
    );
    if after < before {
        anyhow::bail!("checkpoint reduced the committed row count: {before} -> {after}");
    }
    Ok(())
}
