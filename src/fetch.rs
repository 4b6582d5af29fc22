//! Resource graph fetcher.
//!
//! Requests the first listing page, then follows `links.next` until the
//! remote stops sending one, merging every page's `data` and `included`
//! documents into one [`DocumentGraph`].
//!
//! A failure on any page stops pagination. Whatever was accumulated before
//! the failure is still returned, together with the error and
//! `complete = false`, so the caller can process the partial items while
//! refusing to retire anything on the strength of an incomplete listing.
//!
//! Pagination also stops (incomplete) when a next link repeats a page
//! already visited or `max_pages` is reached.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HOST};
use reqwest::Url;
use serde_json::Value;
use trusted_content_core::graph::{DocumentGraph, Page};
use trusted_content_core::resolve::include_paths;
use trusted_content_core::SyncError;

use crate::base::EffectiveBase;
use crate::config::SyncConfig;

/// Primary document type served by the listing endpoint.
pub const ITEM_TYPE: &str = "trust_metadata--trust_metadata";

/// Sparse fieldsets requested per document type.
const SPARSE_FIELDSETS: &[(&str, &str)] = &[
    (
        ITEM_TYPE,
        "trust_role,trust_scope,timeliness,audience,syndication_consumer_sites,\
         syndication_consumer_sites_list,syndication_total_views,changed,node,trust_topics",
    ),
    (
        "node--ucb_article",
        "title,changed,drupal_internal__nid,path,body,field_ucb_article_summary,\
         field_ucb_article_thumbnail",
    ),
    (
        "node--ucb_person",
        "title,changed,drupal_internal__nid,path,body,field_ucb_person_job_summary,\
         field_ucb_person_photo",
    ),
    (
        "node--basic_page",
        "title,changed,drupal_internal__nid,path,body,field_ucb_page_focal_image",
    ),
    ("media--image", "field_media_image"),
    ("file--file", "uri"),
    ("taxonomy_term--trust_topics", "name"),
];

/// Retrieves one decoded page of a listing.
///
/// The HTTP implementation is [`HttpPageSource`]; tests substitute canned
/// pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// GET `url` with `Accept: application/json`, plus a `Host` override
    /// when routing through an internal address.
    async fn get_page(&self, url: &str, host: Option<&str>) -> Result<Value, SyncError>;
}

/// `reqwest`-backed page source with a per-request timeout.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trusted-content-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_page(&self, url: &str, host: Option<&str>) -> Result<Value, SyncError> {
        let mut req = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(host) = host {
            req = req.header(HOST, host);
        }

        let resp = req.send().await.map_err(|e| SyncError::transport(url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::transport(
                url,
                format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(500).collect::<String>()
                ),
            ));
        }

        let body = resp.text().await.map_err(|e| SyncError::transport(url, e))?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::format(url, format!("response is not JSON: {e}")))
    }
}

/// Build the first listing URL for a source.
pub fn listing_url(base: &EffectiveBase, sync: &SyncConfig) -> Result<String, SyncError> {
    let raw = format!("{}{}", base.request_base, sync.endpoint);

    let mut params: Vec<(String, String)> = vec![
        ("include".to_string(), include_paths().join(",")),
        ("sort".to_string(), "-changed".to_string()),
        ("filter[syndication_enabled]".to_string(), "1".to_string()),
        ("page[limit]".to_string(), sync.page_limit.to_string()),
    ];
    for (kind, fields) in SPARSE_FIELDSETS {
        params.push((format!("fields[{kind}]"), fields.to_string()));
    }

    Url::parse_with_params(&raw, &params)
        .map(String::from)
        .map_err(|e| SyncError::configuration(&base.source_name, format!("bad listing URL {raw}: {e}")))
}

/// Result of walking every page of a listing.
#[derive(Debug)]
pub struct FetchOutcome {
    pub graph: DocumentGraph,
    /// Pages successfully merged.
    pub pages: usize,
    /// Whether pagination reached its natural end.
    pub complete: bool,
    /// The failure that stopped pagination, if any.
    pub error: Option<SyncError>,
}

impl FetchOutcome {
    /// At least one page produced a graph.
    pub fn is_usable(&self) -> bool {
        self.pages > 0
    }
}

/// Fetch and merge every page starting at `first_url`.
pub async fn fetch_graph(
    source: &dyn PageSource,
    base: &EffectiveBase,
    first_url: &str,
    max_pages: usize,
) -> FetchOutcome {
    let mut outcome = FetchOutcome {
        graph: DocumentGraph::new(),
        pages: 0,
        complete: false,
        error: None,
    };
    let mut visited: HashSet<String> = HashSet::new();
    let mut url = first_url.to_string();

    loop {
        if outcome.pages >= max_pages {
            tracing::warn!(
                source = %base.source_name,
                url = %url,
                max_pages,
                "page limit reached, listing treated as incomplete"
            );
            break;
        }
        visited.insert(url.clone());

        tracing::debug!(source = %base.source_name, url = %url, "fetching page");
        let page = match source.get_page(&url, base.host_header.as_deref()).await {
            Ok(body) => Page::parse(&url, body),
            Err(e) => Err(e),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        };

        let next = page.next.clone();
        outcome.graph.extend(page);
        outcome.pages += 1;

        match next {
            None => {
                outcome.complete = true;
                break;
            }
            Some(next) => {
                let next = base.rewrite_next(&next);
                if visited.contains(&next) {
                    tracing::warn!(
                        source = %base.source_name,
                        url = %next,
                        "next link points at a page already fetched, stopping"
                    );
                    break;
                }
                url = next;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::resolve_base;
    use crate::config::SourceConfig;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies by URL and records each request.
    struct CannedPages {
        pages: HashMap<String, Result<Value, SyncError>>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    impl CannedPages {
        fn new(pages: Vec<(&str, Result<Value, SyncError>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(u, b)| (u.to_string(), b))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for CannedPages {
        async fn get_page(&self, url: &str, host: Option<&str>) -> Result<Value, SyncError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), host.map(str::to_string)));
            self.pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(SyncError::transport(url, "HTTP 404 Not Found")))
        }
    }

    fn public_base() -> EffectiveBase {
        resolve_base(
            &SourceConfig {
                name: "alpha".into(),
                public_base: "https://alpha.example.edu".into(),
                internal_base: Some("http://10.0.0.5".into()),
            },
            false,
        )
        .unwrap()
    }

    fn item(id: &str) -> Value {
        json!({ "type": ITEM_TYPE, "id": id, "attributes": {} })
    }

    #[tokio::test]
    async fn follows_next_links_until_absent() {
        let pages = CannedPages::new(vec![
            ("p1", Ok(json!({ "data": [item("1")], "links": { "next": { "href": "p2" } } }))),
            ("p2", Ok(json!({ "data": [item("2")], "links": { "next": "p3" } }))),
            ("p3", Ok(json!({ "data": [item("3")], "included": [{ "type": "node", "id": "n" }] }))),
        ]);
        let outcome = fetch_graph(&pages, &public_base(), "p1", 10).await;
        assert!(outcome.complete);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.graph.items().len(), 3);
        assert!(outcome.graph.resolve("node", "n").is_some());
    }

    #[tokio::test]
    async fn failure_mid_pagination_keeps_accumulated_items() {
        let pages = CannedPages::new(vec![
            ("p1", Ok(json!({ "data": [item("1")], "links": { "next": "p2" } }))),
            ("p2", Ok(json!({ "data": [item("2")], "links": { "next": "p3" } }))),
            ("p3", Err(SyncError::transport("p3", "HTTP 502 Bad Gateway"))),
        ]);
        let outcome = fetch_graph(&pages, &public_base(), "p1", 10).await;
        assert!(!outcome.complete);
        assert!(outcome.is_usable());
        assert_eq!(outcome.graph.items().len(), 2);
        assert!(matches!(outcome.error, Some(SyncError::Transport { .. })));
    }

    #[tokio::test]
    async fn malformed_first_page_is_unusable() {
        let pages = CannedPages::new(vec![("p1", Ok(json!({ "errors": [] })))]);
        let outcome = fetch_graph(&pages, &public_base(), "p1", 10).await;
        assert!(!outcome.is_usable());
        assert!(!outcome.complete);
        assert!(matches!(outcome.error, Some(SyncError::Format { .. })));
    }

    #[tokio::test]
    async fn next_link_cycle_stops_incomplete() {
        let pages = CannedPages::new(vec![
            ("p1", Ok(json!({ "data": [item("1")], "links": { "next": "p2" } }))),
            ("p2", Ok(json!({ "data": [item("2")], "links": { "next": "p1" } }))),
        ]);
        let outcome = fetch_graph(&pages, &public_base(), "p1", 10).await;
        assert_eq!(outcome.pages, 2);
        assert!(!outcome.complete);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn max_pages_bounds_the_walk() {
        let pages = CannedPages::new(vec![
            ("p1", Ok(json!({ "data": [item("1")], "links": { "next": "p2" } }))),
            ("p2", Ok(json!({ "data": [item("2")], "links": { "next": "p3" } }))),
        ]);
        let outcome = fetch_graph(&pages, &public_base(), "p1", 1).await;
        assert_eq!(outcome.pages, 1);
        assert!(!outcome.complete);
    }

    #[tokio::test]
    async fn internal_route_sends_host_and_rewrites_next() {
        let base = resolve_base(
            &SourceConfig {
                name: "alpha".into(),
                public_base: "https://alpha.example.edu".into(),
                internal_base: Some("http://10.0.0.5".into()),
            },
            true,
        )
        .unwrap();
        let pages = CannedPages::new(vec![
            (
                "http://10.0.0.5/list",
                Ok(json!({ "data": [item("1")], "links": { "next": "https://alpha.example.edu/list?page=2" } })),
            ),
            ("http://10.0.0.5/list?page=2", Ok(json!({ "data": [item("2")] }))),
        ]);
        let outcome = fetch_graph(&pages, &base, "http://10.0.0.5/list", 10).await;
        assert!(outcome.complete);
        let requests = pages.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0, "http://10.0.0.5/list?page=2");
        assert!(requests
            .iter()
            .all(|(_, host)| host.as_deref() == Some("alpha.example.edu")));
    }

    #[test]
    fn listing_url_carries_query_contract() {
        let url = listing_url(&public_base(), &SyncConfig::default()).unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("alpha.example.edu"));
        assert_eq!(parsed.path(), "/jsonapi/trust_metadata");
        let pairs: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["sort"], "-changed");
        assert_eq!(pairs["filter[syndication_enabled]"], "1");
        assert_eq!(pairs["page[limit]"], "50");
        assert!(pairs["include"].starts_with("node,"));
        assert!(pairs["include"].ends_with("trust_topics"));
        assert!(pairs[&format!("fields[{ITEM_TYPE}]")].contains("trust_role"));
        assert_eq!(pairs["fields[taxonomy_term--trust_topics]"], "name");
    }
}
