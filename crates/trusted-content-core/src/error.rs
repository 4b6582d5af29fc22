//! Error taxonomy for a sync pass.
//!
//! Only [`SyncError::Transport`] and [`SyncError::Configuration`] ever stop
//! a source. [`SyncError::ResolutionGap`] is logged and replaced by a
//! fallback value by the caller; it never aborts an item.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Network or HTTP failure reaching a source.
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// The response body is not a well-formed document graph.
    #[error("malformed response from {url}: {message}")]
    Format { url: String, message: String },

    /// A referenced document or relation is absent from the graph.
    #[error("unresolved {kind} reference {id} ({context})")]
    ResolutionGap {
        kind: String,
        id: String,
        context: String,
    },

    /// No usable base URL could be derived for a source.
    #[error("source '{source_name}' is misconfigured: {message}")]
    Configuration {
        source_name: String,
        message: String,
    },
}

impl SyncError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn format(url: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Format {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(source_name: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Configuration {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-friendly label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport { .. } => "transport",
            SyncError::Format { .. } => "format",
            SyncError::ResolutionGap { .. } => "resolution_gap",
            SyncError::Configuration { .. } => "configuration",
        }
    }
}
