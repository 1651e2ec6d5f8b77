/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::path::Path;

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
    let db = MessageDb::open(&db_path, DurabilityConfig::default())
        .with_context(|| format!("open store: {db_path}"))?;

    // Snapshot before any mutation.
    let backup_dir = Path::new(&db_path)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("backup");
    std::fs::create_dir_all(&backup_dir)
        .with_context(|| format!("create backup dir: {}", backup_dir.display()))?;
    let backup_path = backup_dir.join("store_backup.db");
    db.backup_to(&backup_path)
        .with_context(|| format!("snapshot to {}", backup_path.display()))?;
    println!("backup:     {}", backup_path.display());

    let before = db.message_count()?;
    println!("messages:   {before} (before checkpoint)");

    let stats = db.checkpoint(CheckpointMode::Truncate)?;
    println!(
        "checkpoint: busy={} log={} checkpointed={}",
        stats.busy, stats.log_pages, stats.checkpointed_pages
    );

    let after = db.message_count()?;
    println!("messages:   {after} (after checkpoint)");
    if after < before {
        anyhow::bail!("checkpoint reduced the committed row count: {before} -> {after}");
    }

    db.integrity_check().context("integrity check failed")?;
    println!("integrity:  ok");

    db.optimize()?;
    let wal = db.wal_stats()?;
    println!(
        "files:      db={}B wal={}B shm={}B",
        wal.db_bytes,
        wal.wal_bytes.unwrap_or(0),
        wal.shm_bytes.unwrap_or(0)
    );
    Ok(())
}
