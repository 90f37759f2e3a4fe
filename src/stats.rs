//! `reel init` and `reel stats`.
//!
//! `init` provisions everything a load or a search needs (schema, keyspace,
//! vector index) and is safe to run repeatedly. `stats` prints what is
//! stored per keyspace.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::embedding;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentStore, IndexStatus, VectorIndex};

/// Create the database, keyspace and vector index.
pub async fn run_init(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(&config.db.path).await?;
    let keyspace = config.keyspace.keyspace();
    store.ensure_keyspace(&keyspace).await?;

    let index = VectorIndex::new(
        &config.index.name,
        &config.index.field,
        embedding::index_dims(&config.embedding),
    )?;
    let status = store.create_vector_index(&keyspace, &index).await?;
    tracing::info!("keyspace {} ready", keyspace);

    println!("Database initialized successfully.");
    println!("  keyspace: {}", keyspace);
    println!(
        "  vector index: {} on {} ({} dims, {})",
        index.name,
        index.field,
        index.dims,
        match status {
            IndexStatus::Created => "created",
            IndexStatus::AlreadyExists => "already exists",
        }
    );

    store.close().await;
    Ok(())
}

/// Query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(&config.db.path).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Movie catalog stats");
    println!("===================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));

    let keyspaces = store.keyspaces().await?;
    if keyspaces.is_empty() {
        println!();
        println!("  No keyspaces. Run `reel init` or `reel load` first.");
    }

    for keyspace in &keyspaces {
        let count = store.count(keyspace).await?;
        let row = sqlx::query(
            "SELECT MAX(updated_at) AS last_write, COUNT(text_embedding) AS with_text FROM documents WHERE keyspace = ?",
        )
        .bind(keyspace.to_string())
        .fetch_one(store.pool())
        .await?;
        let last_write: Option<i64> = row.get("last_write");
        let with_text: i64 = row.get("with_text");

        println!();
        println!("  Keyspace:    {}", keyspace);
        println!("  Documents:   {}", count);
        println!("  Text vecs:   {}", with_text);
        println!(
            "  Last write:  {}",
            last_write.map(format_ts).unwrap_or_else(|| "never".to_string())
        );

        let models = sqlx::query(
            "SELECT embedding_model, COUNT(*) AS n FROM documents WHERE keyspace = ? GROUP BY embedding_model ORDER BY n DESC",
        )
        .bind(keyspace.to_string())
        .fetch_all(store.pool())
        .await?;
        for m in &models {
            let model: String = m.get("embedding_model");
            let n: i64 = m.get("n");
            println!("    model {:<32} {:>8}", model, n);
        }

        let indexes = store.list_indexes(keyspace).await?;
        for idx in &indexes {
            println!(
                "    index {:<24} field {:<16} {} dims",
                idx.name, idx.field, idx.dims
            );
        }
    }

    println!();
    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
