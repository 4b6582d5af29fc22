//! Relation resolver and field extraction.
//!
//! Each primary item is a trust-metadata document that points at the
//! content node it describes (`node`), and at taxonomy terms
//! (`trust_topics`). Images hang off the node through a media entity and a
//! file entity:
//!
//! ```text
//! item ──node──▶ node ──<image rel>──▶ media ──field_media_image──▶ file
//!   └──trust_topics──▶ taxonomy_term (name)
//! ```
//!
//! Items that embed their content directly (no `node` relationship) are read
//! as their own content document. A link that cannot be followed is a
//! [`SyncError::ResolutionGap`]: the affected field falls back to empty and
//! the gap is reported alongside the item, never as a failure.

use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;

use crate::error::SyncError;
use crate::graph::{Document, DocumentGraph};
use crate::identity::remote_key;
use crate::models::{coerce, Audience, TelemetrySnapshot, Timeliness, TrustRole, TrustScope};

pub const NODE_RELATIONSHIP: &str = "node";
pub const TOPICS_RELATIONSHIP: &str = "trust_topics";
pub const MEDIA_FILE_RELATIONSHIP: &str = "field_media_image";
pub const IMAGE_STYLE_WIDE: &str = "focal_image_wide";
pub const IMAGE_STYLE_SQUARE: &str = "focal_image_square";

const UNTITLED: &str = "Untitled";

/// Summary field per remote content type. Anything else falls back to a
/// plain `summary` attribute and then to `body.summary`.
const SUMMARY_FIELDS: &[(&str, &str)] = &[
    ("node--ucb_article", "field_ucb_article_summary"),
    ("node--ucb_person", "field_ucb_person_job_summary"),
];

/// Media relationship per remote content type.
const IMAGE_RELATIONSHIPS: &[(&str, &str)] = &[
    ("node--ucb_article", "field_ucb_article_thumbnail"),
    ("node--ucb_person", "field_ucb_person_photo"),
];
const DEFAULT_IMAGE_RELATIONSHIP: &str = "field_ucb_page_focal_image";

/// Every relationship path the resolver may walk, for the `include` query.
pub fn include_paths() -> Vec<String> {
    let mut paths = vec![NODE_RELATIONSHIP.to_string()];
    let rels = IMAGE_RELATIONSHIPS
        .iter()
        .map(|(_, rel)| *rel)
        .chain(std::iter::once(DEFAULT_IMAGE_RELATIONSHIP));
    for rel in rels {
        paths.push(format!("{NODE_RELATIONSHIP}.{rel}"));
        paths.push(format!("{NODE_RELATIONSHIP}.{rel}.{MEDIA_FILE_RELATIONSHIP}"));
    }
    paths.push(TOPICS_RELATIONSHIP.to_string());
    paths
}

fn summary_field(kind: &str) -> Option<&'static str> {
    SUMMARY_FIELDS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, f)| *f)
}

fn image_relationship(kind: &str) -> &'static str {
    IMAGE_RELATIONSHIPS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, r)| *r)
        .unwrap_or(DEFAULT_IMAGE_RELATIONSHIP)
}

/// Why an item was dropped before any decision was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("item has no id")]
    MissingId,
    /// Keyed but unreadable; the key still counts as listed.
    #[error("item {id} has no attributes")]
    MissingAttributes { id: String, remote_key: String },
}

impl SkipReason {
    /// Remote key of the dropped item, when it had an id.
    pub fn remote_key(&self) -> Option<&str> {
        match self {
            SkipReason::MissingId => None,
            SkipReason::MissingAttributes { remote_key, .. } => Some(remote_key.as_str()),
        }
    }
}

/// Pre-rendered focal image URLs and alt text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocalImage {
    pub wide: Option<String>,
    pub square: Option<String>,
    pub alt: Option<String>,
}

/// One item with all relations walked and values normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub remote_id: String,
    pub remote_key: String,
    pub remote_item_type: String,
    pub remote_node_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub trust_role: Option<TrustRole>,
    pub trust_scope: Option<TrustScope>,
    pub timeliness: Option<Timeliness>,
    pub audience: Option<Audience>,
    /// Remote topic names; matched against the local vocabulary later.
    pub topic_names: Vec<String>,
    pub remote_path: Option<String>,
    pub remote_url: Option<String>,
    pub image: FocalImage,
    /// Upstream modification time, epoch seconds.
    pub changed: Option<i64>,
    pub raw_payload: String,
    pub telemetry: TelemetrySnapshot,
    /// Relations that could not be followed.
    pub gaps: Vec<SyncError>,
}

/// Resolve one primary item against the graph.
pub fn resolve_item(
    graph: &DocumentGraph,
    item: &Document,
    source_identity: &str,
) -> Result<ResolvedItem, SkipReason> {
    let remote_id = item.id().ok_or(SkipReason::MissingId)?.to_string();
    if item.attributes().is_none() {
        return Err(SkipReason::MissingAttributes {
            remote_key: remote_key(source_identity, &remote_id),
            id: remote_id,
        });
    }

    let mut gaps = Vec::new();

    let content = match item.relationship_one(NODE_RELATIONSHIP) {
        Some(linkage) => match graph.resolve_ref(&linkage) {
            Some(node) => node,
            None => {
                gaps.push(gap(&linkage.kind, &linkage.id, "item content node"));
                item
            }
        },
        None => item,
    };

    let kind = content
        .kind()
        .or_else(|| item.kind())
        .unwrap_or_default()
        .to_string();

    let title = content
        .attr_str("title")
        .or_else(|| item.attr_str("title"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();

    let changed = content
        .attr("changed")
        .or_else(|| item.attr("changed"))
        .and_then(parse_timestamp);

    let remote_node_id = content
        .attr("drupal_internal__nid")
        .and_then(parse_integer);

    let remote_path = content
        .attr_path(&["path", "alias"])
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| remote_node_id.map(|nid| format!("/node/{nid}")));

    let remote_url = match &remote_path {
        Some(path) => Some(join_url(source_identity, path)),
        None => item
            .attr_str("url")
            .filter(|u| !u.is_empty())
            .map(str::to_string),
    };

    let summary = extract_summary(content, item, &kind);
    let image = resolve_image(graph, content, &kind, &mut gaps);
    let topic_names = resolve_topics(graph, item, &mut gaps);

    Ok(ResolvedItem {
        remote_key: remote_key(source_identity, &remote_id),
        remote_id,
        remote_item_type: kind,
        remote_node_id,
        title,
        summary,
        trust_role: coerce(item.attr_str("trust_role")),
        trust_scope: coerce(item.attr_str("trust_scope")),
        timeliness: coerce(item.attr_str("timeliness")),
        audience: coerce(item.attr_str("audience")),
        topic_names,
        remote_path,
        remote_url,
        image,
        changed,
        raw_payload: item.to_json(),
        telemetry: extract_telemetry(item),
        gaps,
    })
}

fn gap(kind: &str, id: &str, context: &str) -> SyncError {
    SyncError::ResolutionGap {
        kind: kind.to_string(),
        id: id.to_string(),
        context: context.to_string(),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Text fields arrive either as plain strings or as `{ "value", "processed" }`.
fn text_value(value: &Value) -> Option<&str> {
    let text = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => value.get("value").and_then(Value::as_str),
        _ => None,
    };
    text.map(str::trim).filter(|s| !s.is_empty())
}

fn extract_summary(content: &Document, item: &Document, kind: &str) -> String {
    let typed = summary_field(kind).and_then(|f| content.attr(f));
    typed
        .and_then(text_value)
        .or_else(|| content.attr("summary").and_then(text_value))
        .or_else(|| item.attr("summary").and_then(text_value))
        .or_else(|| content.attr_path(&["body", "summary"]).and_then(text_value))
        .unwrap_or_default()
        .to_string()
}

fn resolve_image(
    graph: &DocumentGraph,
    content: &Document,
    kind: &str,
    gaps: &mut Vec<SyncError>,
) -> FocalImage {
    let Some(media_ref) = content.relationship_one(image_relationship(kind)) else {
        return FocalImage::default();
    };
    let Some(media) = graph.resolve_ref(&media_ref) else {
        gaps.push(gap(&media_ref.kind, &media_ref.id, "focal image media"));
        return FocalImage::default();
    };
    let Some(file_ref) = media.relationship_one(MEDIA_FILE_RELATIONSHIP) else {
        return FocalImage::default();
    };
    let link_alt = file_ref
        .meta_str("alt")
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    let Some(file) = graph.resolve_ref(&file_ref) else {
        gaps.push(gap(&file_ref.kind, &file_ref.id, "focal image file"));
        return FocalImage {
            alt: link_alt,
            ..FocalImage::default()
        };
    };

    FocalImage {
        wide: file.link_href(IMAGE_STYLE_WIDE).map(str::to_string),
        square: file.link_href(IMAGE_STYLE_SQUARE).map(str::to_string),
        alt: link_alt
            .or_else(|| file.meta_str("alt").map(str::to_string))
            .filter(|a| !a.is_empty()),
    }
}

fn resolve_topics(
    graph: &DocumentGraph,
    item: &Document,
    gaps: &mut Vec<SyncError>,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for linkage in item.relationship(TOPICS_RELATIONSHIP) {
        let name = graph
            .resolve_ref(&linkage)
            .and_then(|term| term.attr_str("name"))
            .map(str::trim)
            .filter(|n| !n.is_empty());
        match name {
            Some(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            None => gaps.push(gap(&linkage.kind, &linkage.id, "trust topic")),
        }
    }
    names
}

fn extract_telemetry(item: &Document) -> TelemetrySnapshot {
    let consumer_sites = item
        .attr("syndication_consumer_sites_list")
        .map(parse_site_list)
        .unwrap_or_default();
    let consumer_count = item
        .attr("syndication_consumer_sites")
        .and_then(parse_integer)
        .unwrap_or(consumer_sites.len() as i64);
    let total_views = item
        .attr("syndication_total_views")
        .and_then(parse_integer)
        .unwrap_or(0);

    TelemetrySnapshot {
        consumer_count,
        consumer_sites,
        total_views,
    }
}

/// Consumer lists come as a JSON array, a JSON-encoded array string, or a
/// comma-separated string.
fn parse_site_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(list) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if s.trim_start().starts_with('[') => serde_json::from_str::<Value>(s)
            .map(|v| parse_site_list(&v))
            .unwrap_or_default(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Epoch seconds from an integer, a numeric string, or an RFC 3339 string.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    if let Some(ts) = parse_integer(value) {
        return Some(ts);
    }
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.timestamp())
}
