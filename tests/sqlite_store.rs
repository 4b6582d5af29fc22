use std::sync::Arc;

use sqlx::SqlitePool;
use tempfile::TempDir;

use trusted_content_core::identity::remote_key;
use trusted_content_core::models::{
    Audience, ReferenceFields, ReferenceState, TelemetryRecord, TelemetrySnapshot, TrustRole,
};
use trusted_content_core::store::ReferenceStore;
use trusted_content_sync::config::{parse_config, Config};
use trusted_content_sync::sqlite_store::SqliteStore;
use trusted_content_sync::{db, get, migrate, stats};

const ALPHA: &str = "https://alpha.example.edu";
const BETA: &str = "https://beta.example.edu";

async fn setup() -> (TempDir, Config, SqlitePool, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"{}/data/mirror.sqlite\"\n\n[taxonomy]\nterms = [\"Advising\", \"Research\"]\n",
        tmp.path().display()
    ))
    .unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let store = SqliteStore::new(pool.clone());
    (tmp, config, pool, store)
}

fn fields(source: &str, id: &str) -> ReferenceFields {
    ReferenceFields {
        remote_key: remote_key(source, id),
        source_identity: source.to_string(),
        remote_item_type: "node--ucb_article".into(),
        remote_node_id: Some(7),
        title: format!("Item {id}"),
        summary: "Summary".into(),
        trust_role: Some(TrustRole::PrimarySource),
        trust_scope: None,
        timeliness: None,
        audience: Some(Audience::Faculty),
        topics: Vec::new(),
        remote_path: Some(format!("/items/{id}")),
        remote_url: Some(format!("{source}/items/{id}")),
        focal_image_wide: None,
        focal_image_square: None,
        focal_image_alt: None,
        last_changed_remote: 100,
        raw_payload: "{}".into(),
        syndication_consumer_count: 1,
        syndication_total_views: 3,
        last_fetched: 1_000,
    }
}

#[tokio::test]
async fn migrations_are_idempotent_and_seed_terms_once() {
    let (_tmp, config, pool, store) = setup().await;
    migrate::run_migrations(&config).await.unwrap();

    let terms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM taxonomy_terms")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(terms, 2);
    assert!(store.find_term("trust_topics", "Advising").await.unwrap().is_some());
    assert!(store.find_term("trust_topics", "advising").await.unwrap().is_none());
    assert!(store.find_term("other", "Advising").await.unwrap().is_none());
}

#[tokio::test]
async fn create_round_trips_fields_and_topics() {
    let (_tmp, _config, _pool, store) = setup().await;
    let advising = store.find_term("trust_topics", "Advising").await.unwrap().unwrap();
    let research = store.find_term("trust_topics", "Research").await.unwrap().unwrap();

    let mut f = fields(ALPHA, "1");
    f.topics = vec![research, advising];
    let id = store.create(&f).await.unwrap();

    let r = store.find_by_key(ALPHA, &f.remote_key).await.unwrap().unwrap();
    assert_eq!(r.local_key, id);
    assert_eq!(r.state, ReferenceState::Active);
    assert_eq!(r.fields, f);
}

#[tokio::test]
async fn concurrent_first_sightings_converge_on_one_row() {
    let (_tmp, _config, pool, store) = setup().await;
    let store = Arc::new(store);
    let f = fields(ALPHA, "1");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let f = f.clone();
        handles.push(tokio::spawn(async move { store.create(&f).await.unwrap() }));
    }
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_references")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn same_remote_id_under_two_sources_is_two_references() {
    let (_tmp, _config, _pool, store) = setup().await;
    let a = store.create(&fields(ALPHA, "1")).await.unwrap();
    let b = store.create(&fields(BETA, "1")).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(store.query_by_source(ALPHA).await.unwrap().len(), 1);
    assert_eq!(store.query_by_source(BETA).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_rewrites_fields_replaces_topics_and_republishes() {
    let (_tmp, _config, _pool, store) = setup().await;
    let advising = store.find_term("trust_topics", "Advising").await.unwrap().unwrap();
    let research = store.find_term("trust_topics", "Research").await.unwrap().unwrap();

    let mut f = fields(ALPHA, "1");
    f.topics = vec![advising];
    let id = store.create(&f).await.unwrap();
    store.set_published(id, false).await.unwrap();

    f.title = "Renamed".into();
    f.trust_role = None;
    f.topics = vec![research];
    f.last_changed_remote = 90;
    store.update(id, &f).await.unwrap();

    let r = store.find_by_key(ALPHA, &f.remote_key).await.unwrap().unwrap();
    assert!(r.is_published());
    assert_eq!(r.fields.title, "Renamed");
    assert_eq!(r.fields.trust_role, None);
    assert_eq!(r.fields.topics, vec![research]);
    assert_eq!(r.fields.last_changed_remote, 90);
}

#[tokio::test]
async fn update_refuses_mismatched_key() {
    let (_tmp, _config, _pool, store) = setup().await;
    let id = store.create(&fields(ALPHA, "1")).await.unwrap();
    let err = store.update(id, &fields(ALPHA, "2")).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(store.set_published(9_999, false).await.is_err());
}

#[tokio::test]
async fn telemetry_is_appended_and_reported() {
    let (_tmp, config, pool, store) = setup().await;
    let f = fields(ALPHA, "1");
    let id = store.create(&f).await.unwrap();
    let snapshot = TelemetrySnapshot {
        consumer_count: 2,
        consumer_sites: vec!["a".into(), "b".into()],
        total_views: 10,
    };
    for ts in [1_000, 2_000] {
        store
            .create_telemetry(&TelemetryRecord::from_snapshot(&f.remote_key, id, ts, &snapshot))
            .await
            .unwrap();
    }
    let retired = store.create(&fields(ALPHA, "2")).await.unwrap();
    store.set_published(retired, false).await.unwrap();

    let history = store.telemetry_for(id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].fetched_at, 1_000);

    let response = get::lookup(&store, &f.remote_key).await.unwrap();
    assert_eq!(response.telemetry_count, 2);
    assert_eq!(response.latest_telemetry.unwrap().fetched_at, 2_000);
    let json = serde_json::to_value(&response.reference).unwrap();
    assert_eq!(json["trust_role"], "primary_source");
    assert_eq!(json["state"], "active");

    assert!(get::get_reference(&config, "missing").await.is_err());

    let by_source = stats::source_stats(&pool).await.unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].source_identity, ALPHA);
    assert_eq!((by_source[0].published, by_source[0].retired), (1, 1));
    assert_eq!(by_source[0].telemetry, 2);
}
