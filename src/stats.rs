//! Index statistics.
//!
//! Summarizes what the index holds: file location and size, and for each
//! collection the embedding model it is pinned to and its record count.
//! Used by `sieve stats` to confirm an ingestion run landed.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Per-collection breakdown.
struct CollectionStats {
    name: String,
    model: String,
    dims: i64,
    records: i64,
    last_write_ts: Option<i64>,
}

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT
            c.name,
            c.model,
            c.dims,
            COUNT(r.id) AS records,
            MAX(r.updated_at) AS last_write
        FROM collections c
        LEFT JOIN records r ON r.collection = c.name
        GROUP BY c.name
        ORDER BY records DESC, c.name ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let collections: Vec<CollectionStats> = rows
        .iter()
        .map(|row| CollectionStats {
            name: row.get("name"),
            model: row.get("model"),
            dims: row.get("dims"),
            records: row.get("records"),
            last_write_ts: row.get("last_write"),
        })
        .collect();

    let db_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Chat Sieve - Index Stats");
    println!("========================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", config.index.collection);
    println!("  Records:     {}", total_records);

    if !collections.is_empty() {
        println!();
        println!("  By collection:");
        println!(
            "  {:<24} {:>8}   {:<28} {}",
            "COLLECTION", "RECORDS", "MODEL", "LAST WRITE"
        );
        println!("  {}", "-".repeat(76));

        for c in &collections {
            let write_display = match c.last_write_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>8}   {:<28} {}",
                c.name,
                c.records,
                format!("{} ({}d)", c.model, c.dims),
                write_display
            );
        }
    }

    println!();

    pool.close().await;
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

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
