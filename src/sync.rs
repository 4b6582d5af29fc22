//! Sync orchestration across configured sources.
//!
//! For each source: resolve the effective base, build the listing URL,
//! fetch the paginated graph, then resolve → decide → apply every item, and
//! finally retire the keys the pass did not see.
//!
//! Every failure is contained in the source's [`SourceReport`]; a broken
//! source never stops the others. Sources run on a bounded pool of tokio
//! tasks (`sync.concurrency`), each with its own seen-key set, and reports
//! come back in configured order.
//!
//! Retirement happens only when pagination reached its natural end and no
//! store write failed. A partial listing says nothing about the items on
//! pages that were never read.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use trusted_content_core::clock::{Clock, SystemClock};
use trusted_content_core::graph::{Document, DocumentGraph};
use trusted_content_core::resolve::resolve_item;
use trusted_content_core::staleness::{decide, Decision};
use trusted_content_core::store::ReferenceStore;

use crate::base::{resolve_base, EffectiveBase};
use crate::config::{Config, SourceConfig, SyncConfig};
use crate::db;
use crate::fetch::{fetch_graph, listing_url, HttpPageSource, PageSource};
use crate::reconcile::Reconciler;
use crate::sqlite_store::SqliteStore;

/// Options for one pass, derived from config and CLI flags.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync: SyncConfig,
    /// Rewrite every existing reference regardless of timestamps.
    pub force: bool,
    pub vocabulary: String,
}

impl SyncSettings {
    /// `internal` overrides `sync.internal_network` when set.
    pub fn from_config(config: &Config, force: bool, internal: Option<bool>) -> Self {
        let mut sync = config.sync.clone();
        if let Some(internal) = internal {
            sync.internal_network = internal;
        }
        Self {
            sync,
            force,
            vocabulary: config.taxonomy.vocabulary.clone(),
        }
    }
}

/// Outcome of one source's pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub internal: bool,
    pub pages: usize,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub telemetry_only: usize,
    pub skipped: usize,
    pub retired: usize,
    /// Pagination finished and retirement ran.
    pub complete: bool,
    pub error: Option<String>,
}

impl SourceReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn failed(name: &str, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(name)
        }
    }

    fn count(&mut self, decision: Decision) {
        match decision {
            Decision::Create => self.created += 1,
            Decision::Update => self.updated += 1,
            Decision::RecordTelemetryOnly => self.telemetry_only += 1,
            Decision::Skip => self.skipped += 1,
        }
    }
}

impl fmt::Display for SourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.internal { "internal" } else { "public" };
        writeln!(f, "sync {} ({})", self.name, mode)?;
        writeln!(f, "  pages: {}", self.pages)?;
        writeln!(f, "  fetched: {} items", self.fetched)?;
        writeln!(f, "  created: {}", self.created)?;
        writeln!(f, "  updated: {}", self.updated)?;
        writeln!(f, "  telemetry only: {}", self.telemetry_only)?;
        writeln!(f, "  skipped: {}", self.skipped)?;
        writeln!(f, "  retired: {}", self.retired)?;
        match (&self.error, self.complete) {
            (Some(err), _) => write!(f, "error: {err}"),
            (None, false) => write!(f, "incomplete (retirement skipped)"),
            (None, true) => write!(f, "ok"),
        }
    }
}

/// All source reports of one run, in configured order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.sources.iter().any(|s| s.error.is_some())
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, source) in self.sources.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{source}")?;
        }
        Ok(())
    }
}

/// Pick the sources a run covers: all, or the one named.
pub fn select_sources(sources: &[SourceConfig], only: Option<&str>) -> Result<Vec<SourceConfig>> {
    match only {
        None => Ok(sources.to_vec()),
        Some(name) => match sources.iter().find(|s| s.name == name) {
            Some(source) => Ok(vec![source.clone()]),
            None => {
                let known: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
                bail!(
                    "Unknown source: '{}'. Configured: {}",
                    name,
                    if known.is_empty() {
                        "(none)".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            }
        },
    }
}

/// Drives passes over any number of sources. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    pages: Arc<dyn PageSource>,
    reconciler: Arc<Reconciler>,
    settings: Arc<SyncSettings>,
}

impl SyncEngine {
    pub fn new(
        pages: Arc<dyn PageSource>,
        store: Arc<dyn ReferenceStore>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let reconciler = Reconciler::new(store, clock, settings.vocabulary.clone());
        Self {
            pages,
            reconciler: Arc::new(reconciler),
            settings: Arc::new(settings),
        }
    }

    /// Sync `sources`, or only the one named by `only`.
    ///
    /// Errors only when `only` names no configured source; per-source
    /// failures are carried in the report.
    pub async fn run(&self, sources: &[SourceConfig], only: Option<&str>) -> Result<RunReport> {
        let selected = select_sources(sources, only)?;
        Ok(self.run_all(selected).await)
    }

    async fn run_all(&self, sources: Vec<SourceConfig>) -> RunReport {
        let limit = Arc::new(Semaphore::new(self.settings.sync.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, source) in sources.iter().cloned().enumerate() {
            let engine = self.clone();
            let limit = limit.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                (idx, engine.sync_source(&source).await)
            });
        }

        let mut slots: Vec<Option<SourceReport>> = sources.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(e) => tracing::error!(error = %e, "source task failed"),
            }
        }

        RunReport {
            sources: slots
                .into_iter()
                .zip(&sources)
                .map(|(slot, source)| {
                    slot.unwrap_or_else(|| SourceReport::failed(&source.name, "sync task aborted"))
                })
                .collect(),
        }
    }

    /// One source's full pass. Never fails; problems land in the report.
    pub async fn sync_source(&self, source: &SourceConfig) -> SourceReport {
        let mut report = SourceReport::new(&source.name);

        let base = match resolve_base(source, self.settings.sync.internal_network) {
            Ok(base) => base,
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "no usable base URL");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.internal = base.is_internal();

        let url = match listing_url(&base, &self.settings.sync) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "cannot build listing URL");
                report.error = Some(e.to_string());
                return report;
            }
        };

        tracing::info!(
            source = %source.name,
            url = %url,
            internal = base.is_internal(),
            "syncing source"
        );

        let outcome =
            fetch_graph(self.pages.as_ref(), &base, &url, self.settings.sync.max_pages).await;
        report.pages = outcome.pages;
        report.fetched = outcome.graph.items().len();
        if let Some(e) = &outcome.error {
            tracing::error!(source = %source.name, error = %e, "fetch failed");
            report.error = Some(e.to_string());
        }
        if !outcome.is_usable() {
            return report;
        }

        let seen = match self.process_items(&base, &outcome.graph, &mut report).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!(source = %source.name, error = %format!("{e:#}"), "store write failed");
                report.error = Some(format!("store error: {e:#}"));
                return report;
            }
        };

        if !outcome.complete {
            tracing::warn!(
                source = %source.name,
                pages = outcome.pages,
                "listing incomplete, retirement skipped"
            );
            return report;
        }

        match self
            .reconciler
            .retire_missing(&base.source_identity, &seen)
            .await
        {
            Ok(retired) => {
                report.retired = retired;
                report.complete = true;
            }
            Err(e) => {
                tracing::error!(source = %source.name, error = %format!("{e:#}"), "retirement failed");
                report.error = Some(format!("store error: {e:#}"));
            }
        }

        tracing::info!(
            source = %source.name,
            created = report.created,
            updated = report.updated,
            telemetry_only = report.telemetry_only,
            skipped = report.skipped,
            retired = report.retired,
            "source synced"
        );
        report
    }

    /// Resolve, decide and apply every item. Returns the keys seen.
    async fn process_items(
        &self,
        base: &EffectiveBase,
        graph: &DocumentGraph,
        report: &mut SourceReport,
    ) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        for item in graph.items() {
            if let Some(decision) = self.process_item(base, graph, item, &mut seen).await? {
                report.count(decision);
            } else {
                report.skipped += 1;
            }
        }
        Ok(seen)
    }

    /// `None` when the item was dropped before deciding.
    async fn process_item(
        &self,
        base: &EffectiveBase,
        graph: &DocumentGraph,
        item: &Document,
        seen: &mut HashSet<String>,
    ) -> Result<Option<Decision>> {
        let resolved = match resolve_item(graph, item, &base.source_identity) {
            Ok(resolved) => resolved,
            Err(reason) => {
                tracing::warn!(source = %base.source_name, %reason, "skipping item");
                if let Some(key) = reason.remote_key() {
                    seen.insert(key.to_string());
                }
                return Ok(None);
            }
        };
        for gap in &resolved.gaps {
            tracing::warn!(
                source = %base.source_name,
                remote_key = %resolved.remote_key,
                gap = %gap,
                "resolution gap"
            );
        }

        seen.insert(resolved.remote_key.clone());

        let store = self.reconciler.store();
        let local = store
            .find_by_key(&base.source_identity, &resolved.remote_key)
            .await?;
        let decision = decide(resolved.changed, local.as_ref(), self.settings.force);
        if decision == Decision::Skip {
            tracing::warn!(
                source = %base.source_name,
                remote_key = %resolved.remote_key,
                "item has no usable changed timestamp, skipping"
            );
        }
        self.reconciler
            .apply(decision, &resolved, local.as_ref(), &base.source_identity)
            .await?;
        Ok(Some(decision))
    }
}

/// `tcs sync`: run against the configured SQLite mirror over HTTP.
pub async fn run_sync(
    config: &Config,
    only: Option<&str>,
    full: bool,
    internal: Option<bool>,
) -> Result<RunReport> {
    let settings = SyncSettings::from_config(config, full, internal);
    let pages = HttpPageSource::new(Duration::from_secs(settings.sync.timeout_secs))?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let engine = SyncEngine::new(
        Arc::new(pages),
        Arc::new(store),
        Arc::new(SystemClock),
        settings,
    );
    let report = engine.run(&config.sources, only).await;
    pool.close().await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use trusted_content_core::clock::FixedClock;
    use trusted_content_core::identity::remote_key;
    use trusted_content_core::store::memory::InMemoryStore;
    use trusted_content_core::SyncError;

    /// Serves pages by URL prefix (before the query string), so tests need
    /// not rebuild the full listing query.
    #[derive(Default)]
    struct FakeRemote {
        pages: Mutex<HashMap<String, Value>>,
    }

    impl FakeRemote {
        fn set(&self, url: &str, body: Value) {
            self.pages.lock().unwrap().insert(url.to_string(), body);
        }
    }

    #[async_trait]
    impl PageSource for FakeRemote {
        async fn get_page(&self, url: &str, _host: Option<&str>) -> Result<Value, SyncError> {
            let key = url.split('?').next().unwrap_or(url);
            let pages = self.pages.lock().unwrap();
            pages
                .get(url)
                .or_else(|| pages.get(key))
                .cloned()
                .ok_or_else(|| SyncError::transport(url, "HTTP 404 Not Found"))
        }
    }

    fn item(id: &str, changed: i64, role: &str) -> Value {
        json!({
            "type": "trust_metadata--trust_metadata",
            "id": id,
            "attributes": {
                "trust_role": role,
                "changed": changed,
                "syndication_total_views": 5,
            },
        })
    }

    fn source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            public_base: format!("https://{name}.example.edu"),
            internal_base: None,
        }
    }

    fn engine(remote: Arc<FakeRemote>, store: Arc<InMemoryStore>, force: bool) -> SyncEngine {
        let settings = SyncSettings {
            sync: SyncConfig::default(),
            force,
            vocabulary: "trust_topics".into(),
        };
        SyncEngine::new(remote, store, Arc::new(FixedClock::new(500)), settings)
    }

    const ALPHA_LIST: &str = "https://alpha.example.edu/jsonapi/trust_metadata";

    #[tokio::test]
    async fn four_pass_lifecycle() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(remote.clone(), store.clone(), false);
        let sources = vec![source("alpha")];
        let key = remote_key("https://alpha.example.edu", "42");

        remote.set(ALPHA_LIST, json!({ "data": [item("42", 100, "primary_source")] }));
        let report = engine.run(&sources, None).await.unwrap();
        assert_eq!(report.sources[0].created, 1);
        assert!(report.sources[0].complete);

        let report = engine.run(&sources, None).await.unwrap();
        assert_eq!(report.sources[0].telemetry_only, 1);
        assert_eq!(store.telemetry().unwrap().len(), 2);

        remote.set(ALPHA_LIST, json!({ "data": [] }));
        let report = engine.run(&sources, None).await.unwrap();
        assert_eq!(report.sources[0].retired, 1);
        let r = store.find_by_key("https://alpha.example.edu", &key).await.unwrap().unwrap();
        assert!(!r.is_published());

        remote.set(ALPHA_LIST, json!({ "data": [item("42", 90, "primary_source")] }));
        let report = engine.run(&sources, None).await.unwrap();
        assert_eq!(report.sources[0].updated, 1);
        let r = store.find_by_key("https://alpha.example.edu", &key).await.unwrap().unwrap();
        assert!(r.is_published());
        assert_eq!(r.fields.last_changed_remote, 90);
        assert_eq!(store.telemetry().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_source_does_not_stop_others() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(remote.clone(), store.clone(), false);
        remote.set(
            "https://beta.example.edu/jsonapi/trust_metadata",
            json!({ "data": [item("1", 10, "unverified")] }),
        );
        let broken = SourceConfig {
            name: "broken".into(),
            public_base: "".into(),
            internal_base: None,
        };
        let sources = vec![source("alpha"), broken, source("beta")];

        let report = engine.run(&sources, None).await.unwrap();
        let names: Vec<_> = report.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "broken", "beta"]);
        assert!(report.has_errors());
        assert!(report.source("alpha").unwrap().error.as_deref().unwrap().contains("transport"));
        assert!(report.source("broken").unwrap().error.as_deref().unwrap().contains("misconfigured"));
        let beta = report.source("beta").unwrap();
        assert!(beta.error.is_none());
        assert_eq!(beta.created, 1);
    }

    #[tokio::test]
    async fn force_updates_unchanged_items() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        remote.set(ALPHA_LIST, json!({ "data": [item("42", 100, "primary_source")] }));
        let sources = vec![source("alpha")];

        engine(remote.clone(), store.clone(), false)
            .run(&sources, None)
            .await
            .unwrap();
        let report = engine(remote.clone(), store.clone(), true)
            .run(&sources, None)
            .await
            .unwrap();
        assert_eq!(report.sources[0].updated, 1);
    }

    #[tokio::test]
    async fn items_without_identity_are_skipped_but_not_fatal() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        remote.set(
            ALPHA_LIST,
            json!({ "data": [
                { "type": "trust_metadata--trust_metadata", "attributes": {} },
                { "type": "trust_metadata--trust_metadata", "id": "7" },
                item("8", 1, "primary_source"),
            ] }),
        );
        let report = engine(remote, store.clone(), false)
            .run(&[source("alpha")], None)
            .await
            .unwrap();
        let alpha = &report.sources[0];
        assert_eq!(alpha.fetched, 3);
        assert_eq!(alpha.skipped, 2);
        assert_eq!(alpha.created, 1);
        assert!(alpha.complete);
    }

    #[tokio::test]
    async fn listed_item_without_attributes_is_not_retired() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(remote.clone(), store.clone(), false);
        let sources = vec![source("alpha")];
        let key = remote_key("https://alpha.example.edu", "7");

        remote.set(ALPHA_LIST, json!({ "data": [item("7", 1, "primary_source")] }));
        engine.run(&sources, None).await.unwrap();

        remote.set(
            ALPHA_LIST,
            json!({ "data": [{ "type": "trust_metadata--trust_metadata", "id": "7" }] }),
        );
        let report = engine.run(&sources, None).await.unwrap();
        let alpha = &report.sources[0];
        assert_eq!(alpha.skipped, 1);
        assert_eq!(alpha.retired, 0);
        assert!(alpha.complete);
        let r = store.find_by_key("https://alpha.example.edu", &key).await.unwrap().unwrap();
        assert!(r.is_published());
    }

    #[tokio::test]
    async fn active_item_without_changed_is_skipped_and_kept() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(remote.clone(), store.clone(), false);
        let sources = vec![source("alpha")];
        let key = remote_key("https://alpha.example.edu", "42");

        remote.set(ALPHA_LIST, json!({ "data": [item("42", 100, "primary_source")] }));
        engine.run(&sources, None).await.unwrap();

        remote.set(
            ALPHA_LIST,
            json!({ "data": [{
                "type": "trust_metadata--trust_metadata",
                "id": "42",
                "attributes": { "trust_role": "primary_source", "changed": "not a date" },
            }] }),
        );
        let report = engine.run(&sources, None).await.unwrap();
        let alpha = &report.sources[0];
        assert_eq!(alpha.skipped, 1);
        assert_eq!(alpha.retired, 0);
        assert!(alpha.complete);
        let r = store.find_by_key("https://alpha.example.edu", &key).await.unwrap().unwrap();
        assert!(r.is_published());
        assert_eq!(r.fields.last_changed_remote, 100);
    }

    #[tokio::test]
    async fn unknown_source_is_an_error() {
        let remote = Arc::new(FakeRemote::default());
        let store = Arc::new(InMemoryStore::new());
        let err = engine(remote, store, false)
            .run(&[source("alpha")], Some("gamma"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown source: 'gamma'"));
    }

    #[test]
    fn report_summary_lists_counts() {
        let report = SourceReport {
            name: "alpha".into(),
            pages: 2,
            fetched: 3,
            created: 1,
            complete: true,
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.starts_with("sync alpha (public)"));
        assert!(text.contains("  created: 1"));
        assert!(text.ends_with("ok"));
    }
}
