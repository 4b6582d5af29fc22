//! Reference retrieval by remote key.
//!
//! Backs `tcs get <remote_key>`: the mirrored reference as JSON, with its
//! telemetry history summarised.

use anyhow::{bail, Result};
use serde::Serialize;
use trusted_content_core::models::{ContentReference, TelemetryRecord};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceResponse {
    #[serde(flatten)]
    pub reference: ContentReference,
    pub telemetry_count: usize,
    /// Most recent snapshot, if any has been recorded.
    pub latest_telemetry: Option<TelemetryRecord>,
}

/// Look up one reference by remote key.
pub async fn get_reference(config: &Config, remote_key: &str) -> Result<ReferenceResponse> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let response = lookup(&store, remote_key).await;
    pool.close().await;
    response
}

pub async fn lookup(store: &SqliteStore, remote_key: &str) -> Result<ReferenceResponse> {
    let Some(reference) = store.find_by_remote_key(remote_key).await? else {
        bail!("reference not found: {}", remote_key);
    };
    let mut telemetry = store.telemetry_for(reference.local_key).await?;

    Ok(ReferenceResponse {
        telemetry_count: telemetry.len(),
        latest_telemetry: telemetry.pop(),
        reference,
    })
}

/// CLI entry: print the reference as pretty JSON.
pub async fn run_get(config: &Config, remote_key: &str) -> Result<()> {
    let response = get_reference(config, remote_key).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
