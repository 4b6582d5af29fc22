//! Database schema migrations.
//!
//! Every statement is idempotent, so `tcs init` can be re-run at any time.
//! The local taxonomy vocabulary from `[taxonomy]` is seeded here too.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    let seeded = seed_terms(&pool, &config.taxonomy.vocabulary, &config.taxonomy.terms).await?;
    if seeded > 0 {
        tracing::info!(
            vocabulary = %config.taxonomy.vocabulary,
            seeded,
            "seeded taxonomy terms"
        );
    }
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Mirrored content, one row per (source, remote item)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_key TEXT NOT NULL,
            source_identity TEXT NOT NULL,
            remote_item_type TEXT NOT NULL,
            remote_node_id INTEGER,
            title TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            trust_role TEXT NOT NULL DEFAULT '',
            trust_scope TEXT NOT NULL DEFAULT '',
            timeliness TEXT NOT NULL DEFAULT '',
            audience TEXT NOT NULL DEFAULT '',
            remote_path TEXT,
            remote_url TEXT,
            focal_image_wide TEXT,
            focal_image_square TEXT,
            focal_image_alt TEXT,
            last_changed_remote INTEGER NOT NULL,
            raw_payload TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 1,
            syndication_consumer_count INTEGER NOT NULL DEFAULT 0,
            syndication_total_views INTEGER NOT NULL DEFAULT 0,
            last_fetched INTEGER NOT NULL,
            UNIQUE(source_identity, remote_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Local vocabulary; remote topics are matched by exact name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxonomy_terms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vocabulary TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(vocabulary, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reference_topics (
            reference_id INTEGER NOT NULL,
            term_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (reference_id, term_id),
            FOREIGN KEY (reference_id) REFERENCES content_references(id),
            FOREIGN KEY (term_id) REFERENCES taxonomy_terms(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only syndication snapshots
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_key TEXT NOT NULL,
            reference_id INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL,
            consumer_site_count INTEGER NOT NULL DEFAULT 0,
            consumer_site_list TEXT NOT NULL DEFAULT '[]',
            total_views INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (reference_id) REFERENCES content_references(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_references_source ON content_references(source_identity)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_references_remote_key ON content_references(remote_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_telemetry_reference ON telemetry(reference_id, fetched_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Insert any missing terms; returns how many were added.
pub async fn seed_terms(pool: &SqlitePool, vocabulary: &str, terms: &[String]) -> Result<u64> {
    let mut added = 0;
    for name in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let result = sqlx::query("INSERT OR IGNORE INTO taxonomy_terms (vocabulary, name) VALUES (?, ?)")
            .bind(vocabulary)
            .bind(name)
            .execute(pool)
            .await?;
        added += result.rows_affected();
    }
    Ok(added)
}
