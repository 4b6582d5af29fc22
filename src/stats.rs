//! Mirror statistics.
//!
//! `tcs stats` prints reference and telemetry totals with a per-source
//! breakdown, enough to confirm a sync advanced and retirement behaved.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Counts for one source identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source_identity: String,
    pub published: i64,
    pub retired: i64,
    pub telemetry: i64,
    pub last_fetched: Option<i64>,
}

pub async fn source_stats(pool: &SqlitePool) -> Result<Vec<SourceStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            r.source_identity,
            SUM(CASE WHEN r.published = 1 THEN 1 ELSE 0 END) AS published,
            SUM(CASE WHEN r.published = 0 THEN 1 ELSE 0 END) AS retired,
            (SELECT COUNT(*) FROM telemetry t
               JOIN content_references r2 ON r2.id = t.reference_id
              WHERE r2.source_identity = r.source_identity) AS telemetry,
            MAX(r.last_fetched) AS last_fetched
        FROM content_references r
        GROUP BY r.source_identity
        ORDER BY r.source_identity
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SourceStats {
            source_identity: row.get("source_identity"),
            published: row.get("published"),
            retired: row.get("retired"),
            telemetry: row.get("telemetry"),
            last_fetched: row.get("last_fetched"),
        })
        .collect())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = source_stats(&pool).await?;
    pool.close().await;

    let published: i64 = stats.iter().map(|s| s.published).sum();
    let retired: i64 = stats.iter().map(|s| s.retired).sum();
    let telemetry: i64 = stats.iter().map(|s| s.telemetry).sum();

    println!("Trusted Content Sync — Mirror Stats");
    println!("===================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Published:   {}", published);
    println!("  Retired:     {}", retired);
    println!("  Telemetry:   {}", telemetry);

    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<40} {:>9} {:>8} {:>10}   {}",
            "SOURCE", "PUBLISHED", "RETIRED", "TELEMETRY", "LAST FETCH"
        );
        println!("  {}", "-".repeat(90));
        for s in &stats {
            let last = s
                .last_fetched
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<40} {:>9} {:>8} {:>10}   {}",
                s.source_identity, s.published, s.retired, s.telemetry, last
            );
        }
    }

    Ok(())
}
