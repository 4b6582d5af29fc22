//! In-memory JSON:API document graph.
//!
//! A listing response carries primary documents (`data`, or `items` on some
//! endpoints) plus side-loaded `included` documents. Pages are merged into a
//! single [`DocumentGraph`] per source; included documents are indexed by
//! their `(type, id)` pair so relation walking is a hash lookup instead of a
//! scan over the whole collection.
//!
//! Documents are kept as raw [`serde_json::Value`]s so the verbatim item can
//! be retained as the audit payload.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::SyncError;

/// One JSON:API resource object.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

/// A `{ "type", "id" }` linkage taken from a relationship's `data` member.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceIdentifier {
    pub kind: String,
    pub id: String,
    /// Linkage-level `meta` (Drupal puts image `alt` text here).
    pub meta: Option<Value>,
}

impl ResourceIdentifier {
    pub fn meta_str(&self, name: &str) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.get(name))
            .and_then(Value::as_str)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let id = value.get("id")?.as_str()?;
        Some(Self {
            kind: kind.to_string(),
            id: id.to_string(),
            meta: value.get("meta").cloned(),
        })
    }
}

impl Document {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The verbatim document as a JSON string.
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    /// The JSON:API `type` member, e.g. `node--ucb_article`.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// The resource `id`. Blank ids are treated as absent.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn attributes(&self) -> Option<&Map<String, Value>> {
        self.0.get("attributes").and_then(Value::as_object)
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes()?.get(name).filter(|v| !v.is_null())
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(Value::as_str)
    }

    /// Walk nested attribute objects, e.g. `["path", "alias"]`.
    pub fn attr_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.attr(first)?;
        for segment in rest {
            cur = cur.get(segment)?;
        }
        (!cur.is_null()).then_some(cur)
    }

    /// Linkages for a relationship, whether to-one or to-many.
    pub fn relationship(&self, name: &str) -> Vec<ResourceIdentifier> {
        let data = self
            .0
            .get("relationships")
            .and_then(|r| r.get(name))
            .and_then(|r| r.get("data"));
        match data {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(ResourceIdentifier::from_value)
                .collect(),
            Some(obj @ Value::Object(_)) => {
                ResourceIdentifier::from_value(obj).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// First linkage of a to-one relationship.
    pub fn relationship_one(&self, name: &str) -> Option<ResourceIdentifier> {
        self.relationship(name).into_iter().next()
    }

    /// `links.<name>` as either a bare string or `{ "href": .. }`.
    pub fn link_href(&self, name: &str) -> Option<&str> {
        link_href(self.0.get("links")?, name)
    }

    pub fn meta_str(&self, name: &str) -> Option<&str> {
        self.0.get("meta")?.get(name)?.as_str()
    }
}

fn link_href<'a>(links: &'a Value, name: &str) -> Option<&'a str> {
    let href = match links.get(name)? {
        Value::String(s) => Some(s.as_str()),
        obj @ Value::Object(_) => obj.get("href").and_then(Value::as_str),
        _ => None,
    };
    href.filter(|s| !s.is_empty())
}

/// One parsed listing page.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Document>,
    pub included: Vec<Document>,
    pub next: Option<String>,
}

impl Page {
    /// Parse a decoded response body.
    ///
    /// The body must be an object with a `data` (or `items`) array. A missing
    /// or non-array `included` is treated as empty.
    pub fn parse(url: &str, body: Value) -> Result<Self, SyncError> {
        let Value::Object(mut top) = body else {
            return Err(SyncError::format(url, "top-level value is not an object"));
        };

        let items = match top.remove("data").or_else(|| top.remove("items")) {
            Some(Value::Array(list)) => list,
            Some(_) => {
                return Err(SyncError::format(url, "items collection is not an array"));
            }
            None => {
                return Err(SyncError::format(url, "missing items collection"));
            }
        };

        let included = match top.remove("included") {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        };

        let next = top
            .get("links")
            .and_then(|links| link_href(links, "next"))
            .map(str::to_string);

        Ok(Self {
            items: items.into_iter().map(Document::new).collect(),
            included: included.into_iter().map(Document::new).collect(),
            next,
        })
    }
}

/// Primary and included documents accumulated across all pages of a fetch.
#[derive(Debug, Clone, Default)]
pub struct DocumentGraph {
    items: Vec<Document>,
    included: Vec<Document>,
    index: HashMap<(String, String), usize>,
}

impl DocumentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page, preserving order. When the same `(type, id)` is
    /// included on several pages, the most recent one wins on lookup.
    pub fn extend(&mut self, page: Page) {
        self.items.extend(page.items);
        for doc in page.included {
            if let (Some(kind), Some(id)) = (doc.kind(), doc.id()) {
                self.index
                    .insert((kind.to_string(), id.to_string()), self.included.len());
            }
            self.included.push(doc);
        }
    }

    pub fn items(&self) -> &[Document] {
        &self.items
    }

    pub fn included(&self) -> &[Document] {
        &self.included
    }

    /// Look up an included document by exact `(type, id)`.
    pub fn resolve(&self, kind: &str, id: &str) -> Option<&Document> {
        self.index
            .get(&(kind.to_string(), id.to_string()))
            .and_then(|&i| self.included.get(i))
    }

    pub fn resolve_ref(&self, linkage: &ResourceIdentifier) -> Option<&Document> {
        self.resolve(&linkage.kind, &linkage.id)
    }
}
