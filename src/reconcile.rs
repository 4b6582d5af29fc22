//! Applies staleness decisions to the local mirror.
//!
//! `Create`/`Update` write every field of the content reference in one store
//! call and then append a telemetry record. `RecordTelemetryOnly` appends the
//! telemetry record alone. `Skip` touches nothing.
//!
//! Retirement runs once per source after its item loop, and only flips the
//! published flag; references are never deleted.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use trusted_content_core::clock::Clock;
use trusted_content_core::models::{ContentReference, ReferenceFields, TelemetryRecord};
use trusted_content_core::resolve::ResolvedItem;
use trusted_content_core::staleness::Decision;
use trusted_content_core::store::ReferenceStore;

pub struct Reconciler {
    store: Arc<dyn ReferenceStore>,
    clock: Arc<dyn Clock>,
    vocabulary: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReferenceStore>,
        clock: Arc<dyn Clock>,
        vocabulary: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            vocabulary: vocabulary.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReferenceStore> {
        &self.store
    }

    /// Map remote topic names to local term ids by exact name.
    ///
    /// Names with no local term are dropped with a warning; terms are never
    /// created here.
    pub async fn match_topics(&self, item: &ResolvedItem) -> Result<Vec<i64>> {
        let mut topics = Vec::with_capacity(item.topic_names.len());
        for name in &item.topic_names {
            match self.store.find_term(&self.vocabulary, name).await? {
                Some(term) => {
                    if !topics.contains(&term) {
                        topics.push(term);
                    }
                }
                None => tracing::warn!(
                    remote_key = %item.remote_key,
                    topic = %name,
                    vocabulary = %self.vocabulary,
                    "no local term matches remote topic, dropping"
                ),
            }
        }
        Ok(topics)
    }

    /// Assemble the full field set written on create or update.
    ///
    /// An item without a usable `changed` keeps the local timestamp, or `0`
    /// on first sighting.
    pub fn build_fields(
        &self,
        item: &ResolvedItem,
        source_identity: &str,
        topics: Vec<i64>,
        local: Option<&ContentReference>,
    ) -> ReferenceFields {
        let last_changed_remote = item
            .changed
            .or_else(|| local.map(|r| r.fields.last_changed_remote))
            .unwrap_or(0);

        ReferenceFields {
            remote_key: item.remote_key.clone(),
            source_identity: source_identity.to_string(),
            remote_item_type: item.remote_item_type.clone(),
            remote_node_id: item.remote_node_id,
            title: item.title.clone(),
            summary: item.summary.clone(),
            trust_role: item.trust_role,
            trust_scope: item.trust_scope,
            timeliness: item.timeliness,
            audience: item.audience,
            topics,
            remote_path: item.remote_path.clone(),
            remote_url: item.remote_url.clone(),
            focal_image_wide: item.image.wide.clone(),
            focal_image_square: item.image.square.clone(),
            focal_image_alt: item.image.alt.clone(),
            last_changed_remote,
            raw_payload: item.raw_payload.clone(),
            syndication_consumer_count: item.telemetry.consumer_count,
            syndication_total_views: item.telemetry.total_views,
            last_fetched: self.clock.now(),
        }
    }

    /// Commit one decision. Returns the local key written against, or
    /// `None` for [`Decision::Skip`].
    pub async fn apply(
        &self,
        decision: Decision,
        item: &ResolvedItem,
        local: Option<&ContentReference>,
        source_identity: &str,
    ) -> Result<Option<i64>> {
        let local_key = match decision {
            Decision::Skip => return Ok(None),
            Decision::Create => {
                let topics = self.match_topics(item).await?;
                let fields = self.build_fields(item, source_identity, topics, local);
                self.store.create(&fields).await?
            }
            Decision::Update => {
                let Some(local) = local else {
                    bail!("cannot update {}: no local reference", item.remote_key);
                };
                let topics = self.match_topics(item).await?;
                let fields = self.build_fields(item, source_identity, topics, Some(local));
                self.store.update(local.local_key, &fields).await?;
                local.local_key
            }
            Decision::RecordTelemetryOnly => match local {
                Some(local) => local.local_key,
                None => bail!(
                    "cannot record telemetry for {}: no local reference",
                    item.remote_key
                ),
            },
        };

        let record = TelemetryRecord::from_snapshot(
            &item.remote_key,
            local_key,
            self.clock.now(),
            &item.telemetry,
        );
        self.store.create_telemetry(&record).await?;

        tracing::debug!(
            remote_key = %item.remote_key,
            local_key,
            ?decision,
            "applied"
        );
        Ok(Some(local_key))
    }

    /// Unpublish every published reference of `source_identity` whose key
    /// is not in `seen`. Returns how many were retired.
    pub async fn retire_missing(
        &self,
        source_identity: &str,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let mut retired = 0;
        for key in self.store.query_by_source(source_identity).await? {
            if key.state.is_published() && !seen.contains(&key.remote_key) {
                self.store.set_published(key.local_key, false).await?;
                tracing::info!(
                    source_identity,
                    remote_key = %key.remote_key,
                    "retired reference missing upstream"
                );
                retired += 1;
            }
        }
        Ok(retired)
    }
}
