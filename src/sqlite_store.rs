//! SQLite-backed [`ReferenceStore`] implementation.
//!
//! Each field write (reference columns plus the topic join rows) runs in
//! one transaction. `create` relies on the `UNIQUE(source_identity,
//! remote_key)` constraint with `ON CONFLICT .. DO UPDATE`, so two writers
//! racing on the same first sighting converge on a single row.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use trusted_content_core::models::{
    allow_list_str, coerce, ContentReference, ReferenceFields, ReferenceState, StoredKey,
    TelemetryRecord,
};
use trusted_content_core::store::ReferenceStore;

const REFERENCE_COLUMNS: &str = "id, remote_key, source_identity, remote_item_type, \
    remote_node_id, title, summary, trust_role, trust_scope, timeliness, audience, \
    remote_path, remote_url, focal_image_wide, focal_image_square, focal_image_alt, \
    last_changed_remote, raw_payload, published, syndication_consumer_count, \
    syndication_total_views, last_fetched";

/// SQLite implementation of the [`ReferenceStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look up a reference by remote key regardless of source.
    ///
    /// Keys embed the source identity in their hash, so a match is unique in
    /// practice; the first row wins otherwise.
    pub async fn find_by_remote_key(&self, remote_key: &str) -> Result<Option<ContentReference>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM content_references WHERE remote_key = ? ORDER BY id LIMIT 1"
        ))
        .bind(remote_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    /// Telemetry history for a reference, oldest first.
    pub async fn telemetry_for(&self, reference_id: i64) -> Result<Vec<TelemetryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT remote_key, reference_id, fetched_at, consumer_site_count,
                   consumer_site_list, total_views
            FROM telemetry WHERE reference_id = ? ORDER BY fetched_at, id
            "#,
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TelemetryRecord {
                remote_key: row.get("remote_key"),
                reference_key: row.get("reference_id"),
                fetched_at: row.get("fetched_at"),
                consumer_site_count: row.get("consumer_site_count"),
                consumer_site_list: row.get("consumer_site_list"),
                total_views: row.get("total_views"),
            })
            .collect())
    }

    async fn topics_for(&self, reference_id: i64) -> Result<Vec<i64>> {
        let topics = sqlx::query_scalar(
            "SELECT term_id FROM reference_topics WHERE reference_id = ? ORDER BY position",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(topics)
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<ContentReference> {
        let local_key: i64 = row.get("id");
        let topics = self.topics_for(local_key).await?;
        Ok(row_to_reference(row, topics))
    }
}

fn row_to_reference(row: &SqliteRow, topics: Vec<i64>) -> ContentReference {
    let text = |col: &str| -> String { row.get(col) };
    let published: bool = row.get("published");

    ContentReference {
        local_key: row.get("id"),
        state: ReferenceState::from_published(published),
        fields: ReferenceFields {
            remote_key: text("remote_key"),
            source_identity: text("source_identity"),
            remote_item_type: text("remote_item_type"),
            remote_node_id: row.get("remote_node_id"),
            title: text("title"),
            summary: text("summary"),
            trust_role: coerce(Some(text("trust_role").as_str())),
            trust_scope: coerce(Some(text("trust_scope").as_str())),
            timeliness: coerce(Some(text("timeliness").as_str())),
            audience: coerce(Some(text("audience").as_str())),
            topics,
            remote_path: row.get("remote_path"),
            remote_url: row.get("remote_url"),
            focal_image_wide: row.get("focal_image_wide"),
            focal_image_square: row.get("focal_image_square"),
            focal_image_alt: row.get("focal_image_alt"),
            last_changed_remote: row.get("last_changed_remote"),
            raw_payload: text("raw_payload"),
            syndication_consumer_count: row.get("syndication_consumer_count"),
            syndication_total_views: row.get("syndication_total_views"),
            last_fetched: row.get("last_fetched"),
        },
    }
}

async fn replace_topics(
    tx: &mut Transaction<'_, Sqlite>,
    reference_id: i64,
    topics: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM reference_topics WHERE reference_id = ?")
        .bind(reference_id)
        .execute(&mut **tx)
        .await?;

    for (position, term_id) in topics.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO reference_topics (reference_id, term_id, position) VALUES (?, ?, ?)",
        )
        .bind(reference_id)
        .bind(term_id)
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ReferenceStore for SqliteStore {
    async fn find_by_key(
        &self,
        source_identity: &str,
        remote_key: &str,
    ) -> Result<Option<ContentReference>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM content_references WHERE source_identity = ? AND remote_key = ?"
        ))
        .bind(source_identity)
        .bind(remote_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, f: &ReferenceFields) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO content_references (
                remote_key, source_identity, remote_item_type, remote_node_id, title,
                summary, trust_role, trust_scope, timeliness, audience, remote_path,
                remote_url, focal_image_wide, focal_image_square, focal_image_alt,
                last_changed_remote, raw_payload, published, syndication_consumer_count,
                syndication_total_views, last_fetched)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(source_identity, remote_key) DO UPDATE SET
                remote_item_type = excluded.remote_item_type,
                remote_node_id = excluded.remote_node_id,
                title = excluded.title,
                summary = excluded.summary,
                trust_role = excluded.trust_role,
                trust_scope = excluded.trust_scope,
                timeliness = excluded.timeliness,
                audience = excluded.audience,
                remote_path = excluded.remote_path,
                remote_url = excluded.remote_url,
                focal_image_wide = excluded.focal_image_wide,
                focal_image_square = excluded.focal_image_square,
                focal_image_alt = excluded.focal_image_alt,
                last_changed_remote = excluded.last_changed_remote,
                raw_payload = excluded.raw_payload,
                published = 1,
                syndication_consumer_count = excluded.syndication_consumer_count,
                syndication_total_views = excluded.syndication_total_views,
                last_fetched = excluded.last_fetched
            RETURNING id
            "#,
        )
        .bind(&f.remote_key)
        .bind(&f.source_identity)
        .bind(&f.remote_item_type)
        .bind(f.remote_node_id)
        .bind(&f.title)
        .bind(&f.summary)
        .bind(allow_list_str(&f.trust_role))
        .bind(allow_list_str(&f.trust_scope))
        .bind(allow_list_str(&f.timeliness))
        .bind(allow_list_str(&f.audience))
        .bind(&f.remote_path)
        .bind(&f.remote_url)
        .bind(&f.focal_image_wide)
        .bind(&f.focal_image_square)
        .bind(&f.focal_image_alt)
        .bind(f.last_changed_remote)
        .bind(&f.raw_payload)
        .bind(f.syndication_consumer_count)
        .bind(f.syndication_total_views)
        .bind(f.last_fetched)
        .fetch_one(&mut *tx)
        .await?;

        replace_topics(&mut tx, id, &f.topics).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn update(&self, local_key: i64, f: &ReferenceFields) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE content_references SET
                remote_item_type = ?, remote_node_id = ?, title = ?, summary = ?,
                trust_role = ?, trust_scope = ?, timeliness = ?, audience = ?,
                remote_path = ?, remote_url = ?, focal_image_wide = ?,
                focal_image_square = ?, focal_image_alt = ?, last_changed_remote = ?,
                raw_payload = ?, published = 1, syndication_consumer_count = ?,
                syndication_total_views = ?, last_fetched = ?
            WHERE id = ? AND source_identity = ? AND remote_key = ?
            "#,
        )
        .bind(&f.remote_item_type)
        .bind(f.remote_node_id)
        .bind(&f.title)
        .bind(&f.summary)
        .bind(allow_list_str(&f.trust_role))
        .bind(allow_list_str(&f.trust_scope))
        .bind(allow_list_str(&f.timeliness))
        .bind(allow_list_str(&f.audience))
        .bind(&f.remote_path)
        .bind(&f.remote_url)
        .bind(&f.focal_image_wide)
        .bind(&f.focal_image_square)
        .bind(&f.focal_image_alt)
        .bind(f.last_changed_remote)
        .bind(&f.raw_payload)
        .bind(f.syndication_consumer_count)
        .bind(f.syndication_total_views)
        .bind(f.last_fetched)
        .bind(local_key)
        .bind(&f.source_identity)
        .bind(&f.remote_key)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            bail!(
                "content reference {} not found for remote key {}",
                local_key,
                f.remote_key
            );
        }

        replace_topics(&mut tx, local_key, &f.topics).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_published(&self, local_key: i64, published: bool) -> Result<()> {
        let result = sqlx::query("UPDATE content_references SET published = ? WHERE id = ?")
            .bind(published)
            .bind(local_key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("content reference {} not found", local_key);
        }
        Ok(())
    }

    async fn query_by_source(&self, source_identity: &str) -> Result<Vec<StoredKey>> {
        let rows = sqlx::query(
            "SELECT id, remote_key, published FROM content_references WHERE source_identity = ? ORDER BY id",
        )
        .bind(source_identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredKey {
                local_key: row.get("id"),
                remote_key: row.get("remote_key"),
                state: ReferenceState::from_published(row.get("published")),
            })
            .collect())
    }

    async fn create_telemetry(&self, record: &TelemetryRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO telemetry (remote_key, reference_id, fetched_at, consumer_site_count,
                                   consumer_site_list, total_views)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.remote_key)
        .bind(record.reference_key)
        .bind(record.fetched_at)
        .bind(record.consumer_site_count)
        .bind(&record.consumer_site_list)
        .bind(record.total_views)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn find_term(&self, vocabulary: &str, name: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM taxonomy_terms WHERE vocabulary = ? AND name = ?")
            .bind(vocabulary)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}
