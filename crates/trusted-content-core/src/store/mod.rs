//! Storage abstraction for the local mirror.
//!
//! The [`ReferenceStore`] trait is the only way the sync engine touches
//! persisted state, which keeps the pipeline testable against the
//! [`memory::InMemoryStore`] and deployable against SQLite.
//!
//! Implementations must be `Send + Sync`; sources may be synced
//! concurrently against one store.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ContentReference, ReferenceFields, StoredKey, TelemetryRecord};

/// Abstract storage backend for content references and telemetry.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_key`](ReferenceStore::find_by_key) | Unique lookup by `(source_identity, remote_key)` |
/// | [`create`](ReferenceStore::create) | Insert a reference (conflict-safe) |
/// | [`update`](ReferenceStore::update) | Rewrite all fields and republish |
/// | [`set_published`](ReferenceStore::set_published) | Retire or restore a reference |
/// | [`query_by_source`](ReferenceStore::query_by_source) | Keys owned by one source |
/// | [`create_telemetry`](ReferenceStore::create_telemetry) | Append a telemetry record |
/// | [`find_term`](ReferenceStore::find_term) | Exact-name taxonomy lookup |
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn find_by_key(
        &self,
        source_identity: &str,
        remote_key: &str,
    ) -> Result<Option<ContentReference>>;

    /// Insert a new, published reference and return its local key.
    ///
    /// Must be atomic check-then-write on `(source_identity, remote_key)`:
    /// if a concurrent writer created the same key first, the existing row
    /// is updated in place and its key returned, never duplicated.
    async fn create(&self, fields: &ReferenceFields) -> Result<i64>;

    /// Overwrite every field of an existing reference, including topics,
    /// and mark it published, as one transactional write.
    async fn update(&self, local_key: i64, fields: &ReferenceFields) -> Result<()>;

    async fn set_published(&self, local_key: i64, published: bool) -> Result<()>;

    async fn query_by_source(&self, source_identity: &str) -> Result<Vec<StoredKey>>;

    async fn create_telemetry(&self, record: &TelemetryRecord) -> Result<i64>;

    /// Local term id for an exact `name` within `vocabulary`.
    async fn find_term(&self, vocabulary: &str, name: &str) -> Result<Option<i64>>;
}
