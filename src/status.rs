//! Store and index overview.
//!
//! `isync status` prints how many records each model holds, how many
//! documents each (index, culture, tag) holds and when it was last written,
//! and any rebuild checkpoints left behind by an interrupted rebuild.

use anyhow::Result;
use sqlx::Row;

use crate::checkpoint::FileCheckpointStore;
use crate::config::{Config, StoreDriver};
use crate::db;
use crate::sqlite_backend::SqliteSearchBackend;

/// Run the status command and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    println!("index-sync status: {} ({})", config.application, config.environment);
    println!("==========================");
    println!();
    println!("  Store:       {} {}", config.store.driver.as_str(), config.store.path.display());
    println!("  Search:      {}", config.search.path.display());
    println!("  State dir:   {}", config.state.dir.display());
    println!(
        "  Live sync:   {}",
        if config.sync.disable_live_indexing {
            "disabled"
        } else {
            "enabled"
        }
    );

    if config.store.driver == StoreDriver::Sqlite {
        let pool = db::connect_store(config).await?;
        let rows = sqlx::query("SELECT model, COUNT(*) AS records FROM records GROUP BY model ORDER BY model")
            .fetch_all(&pool)
            .await?;
        println!();
        println!("  Records:");
        if rows.is_empty() {
            println!("    (none)");
        }
        for row in &rows {
            let model: String = row.get("model");
            let records: i64 = row.get("records");
            println!("    {:<24} {:>8}", model, records);
        }
        pool.close().await;
    }

    let search = SqliteSearchBackend::new(db::connect_search(config).await?);
    let counts = search.tag_counts().await?;
    println!();
    println!("  Documents:");
    if counts.is_empty() {
        println!("    (none)");
    } else {
        println!(
            "    {:<16} {:<8} {:<20} {:>8}   {}",
            "INDEX", "CULTURE", "TAG", "DOCS", "LAST INDEXED"
        );
        println!("    {}", "-".repeat(72));
        for c in &counts {
            println!(
                "    {:<16} {:<8} {:<20} {:>8}   {}",
                c.index,
                c.culture,
                c.tag,
                c.documents,
                format_ts_relative(c.last_indexed)
            );
        }
    }
    search.pool().close().await;

    let checkpoints = FileCheckpointStore::new(&config.state.dir).list()?;
    if !checkpoints.is_empty() {
        println!();
        println!("  Interrupted rebuilds (resume with --resume):");
        for (model, cp) in &checkpoints {
            println!(
                "    {:<24} {} last page {} (page size {})",
                model,
                cp.target(),
                cp.page,
                cp.page_size
            );
        }
    }

    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

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
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now - 86400 * 3), "3 days ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
