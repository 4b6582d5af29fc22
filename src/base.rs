//! Effective base URL selection per source.
//!
//! A source always has a public identity (its public base) and may have an
//! internal base reachable only from inside the private network. When
//! running in internal-network mode and an internal base is configured, the
//! listing is fetched from the internal address with a `Host` header naming
//! the public host, so the remote's virtual hosting still resolves.
//!
//! The public base is the source identity either way, so records stay
//! addressable no matter which route served them.

use reqwest::Url;
use trusted_content_core::SyncError;

use crate::config::SourceConfig;

/// Where and how to reach one source for this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveBase {
    pub source_name: String,
    /// Normalised public base; also the identity keys are derived from.
    pub source_identity: String,
    /// Base the requests are actually sent to.
    pub request_base: String,
    /// `Host` header to send, only when routing internally.
    pub host_header: Option<String>,
}

impl EffectiveBase {
    pub fn is_internal(&self) -> bool {
        self.host_header.is_some()
    }

    /// Point a remote-issued next link at the base we are actually using.
    ///
    /// Remotes build pagination links from their public hostname; following
    /// those from inside the network would leave the internal route.
    pub fn rewrite_next(&self, next: &str) -> String {
        if self.is_internal() {
            if let Some(rest) = next.strip_prefix(&self.source_identity) {
                if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
                    return format!("{}{}", self.request_base, rest);
                }
            }
        }
        next.to_string()
    }
}

/// Normalised public base of a source, the key space its records live in.
pub fn source_identity(source: &SourceConfig) -> Result<String, SyncError> {
    parse_base(&source.name, "public_base", &source.public_base).map(|url| normalize(&url))
}

/// Resolve the effective base for a source.
///
/// Fails with [`SyncError::Configuration`] when the public base is missing
/// or unparseable, or when the selected internal base is unparseable.
pub fn resolve_base(source: &SourceConfig, internal_network: bool) -> Result<EffectiveBase, SyncError> {
    let public = parse_base(&source.name, "public_base", &source.public_base)?;
    let source_identity = normalize(&public);

    let internal = source
        .internal_base
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty());

    match internal {
        Some(raw) if internal_network => {
            let internal = parse_base(&source.name, "internal_base", raw)?;
            Ok(EffectiveBase {
                source_name: source.name.clone(),
                source_identity,
                request_base: normalize(&internal),
                host_header: Some(host_with_port(&public)),
            })
        }
        _ => Ok(EffectiveBase {
            source_name: source.name.clone(),
            request_base: source_identity.clone(),
            source_identity,
            host_header: None,
        }),
    }
}

fn parse_base(source_name: &str, field: &str, raw: &str) -> Result<Url, SyncError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SyncError::configuration(
            source_name,
            format!("{field} is not set"),
        ));
    }
    let url = Url::parse(raw).map_err(|e| {
        SyncError::configuration(source_name, format!("{field} '{raw}' is not a valid URL: {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SyncError::configuration(
            source_name,
            format!("{field} '{raw}' must be an absolute http(s) URL"),
        ));
    }
    Ok(url)
}

/// `scheme://host[:port][/path]`, lowercase host, no trailing slash, no
/// query or fragment.
fn normalize(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    format!("{}://{}{}", url.scheme(), host_with_port(url), path)
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(public: &str, internal: Option<&str>) -> SourceConfig {
        SourceConfig {
            name: "alpha".into(),
            public_base: public.into(),
            internal_base: internal.map(str::to_string),
        }
    }

    #[test]
    fn public_mode_uses_public_base() {
        let base = resolve_base(
            &source("https://Alpha.Example.edu/", Some("http://10.0.0.5:8080")),
            false,
        )
        .unwrap();
        assert_eq!(base.source_identity, "https://alpha.example.edu");
        assert_eq!(base.request_base, "https://alpha.example.edu");
        assert!(base.host_header.is_none());
    }

    #[test]
    fn internal_mode_uses_internal_base_with_public_host() {
        let base = resolve_base(
            &source("https://alpha.example.edu/law", Some("http://10.0.0.5:8080/law/")),
            true,
        )
        .unwrap();
        assert_eq!(base.source_identity, "https://alpha.example.edu/law");
        assert_eq!(base.request_base, "http://10.0.0.5:8080/law");
        assert_eq!(base.host_header.as_deref(), Some("alpha.example.edu"));
        assert!(base.is_internal());
    }

    #[test]
    fn internal_mode_without_internal_base_falls_back_to_public() {
        let base = resolve_base(&source("https://alpha.example.edu", None), true).unwrap();
        assert_eq!(base.request_base, "https://alpha.example.edu");
        assert!(!base.is_internal());
        let base = resolve_base(&source("https://alpha.example.edu", Some("  ")), true).unwrap();
        assert!(!base.is_internal());
    }

    #[test]
    fn missing_or_invalid_public_base_is_a_configuration_error() {
        for bad in ["", "   ", "not a url", "ftp://alpha.example.edu", "mailto:x@y.z"] {
            let err = resolve_base(&source(bad, None), false).unwrap_err();
            assert!(
                matches!(err, SyncError::Configuration { .. }),
                "expected configuration error for {bad:?}, got {err:?}"
            );
        }
        let err = resolve_base(&source("https://alpha.example.edu", Some("::")), true).unwrap_err();
        assert!(matches!(err, SyncError::Configuration { .. }));
    }

    #[test]
    fn next_links_are_rewritten_only_when_internal() {
        let internal = resolve_base(
            &source("https://alpha.example.edu", Some("http://10.0.0.5:8080")),
            true,
        )
        .unwrap();
        assert_eq!(
            internal.rewrite_next("https://alpha.example.edu/jsonapi/x?page[offset]=50"),
            "http://10.0.0.5:8080/jsonapi/x?page[offset]=50"
        );
        // Different host, or a prefix that is not a path boundary, passes through.
        assert_eq!(
            internal.rewrite_next("https://cdn.example.edu/x"),
            "https://cdn.example.edu/x"
        );
        assert_eq!(
            internal.rewrite_next("https://alpha.example.edu.evil/x"),
            "https://alpha.example.edu.evil/x"
        );

        let public = resolve_base(&source("https://alpha.example.edu", None), true).unwrap();
        assert_eq!(
            public.rewrite_next("https://alpha.example.edu/jsonapi/x"),
            "https://alpha.example.edu/jsonapi/x"
        );
    }
}
