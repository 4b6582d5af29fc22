//! Configuration parsing and validation.
//!
//! Trusted Content Sync is configured via a TOML file (default:
//! `config/tcs.toml`). Sources are an ordered `[[sources]]` array; they are
//! synced and reported in file order.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/trusted.sqlite"
//!
//! [sync]
//! endpoint = "/jsonapi/trust_metadata"
//! internal_network = false
//! concurrency = 2
//!
//! [taxonomy]
//! vocabulary = "trust_topics"
//! terms = ["Advising", "Financial Aid"]
//!
//! [[sources]]
//! name = "alpha"
//! public_base = "https://alpha.example.edu"
//! internal_base = "http://alpha.internal:8080"
//! ```
//!
//! # Environment
//!
//! `TCS_INTERNAL_NETWORK` (`1`/`true`/`yes` or `0`/`false`/`no`) overrides
//! `sync.internal_network`, so the same file can be deployed inside and
//! outside the private network.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::base::source_identity;

/// Environment flag selecting internal-vs-public base resolution.
pub const INTERNAL_NETWORK_ENV: &str = "TCS_INTERNAL_NETWORK";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Listing path appended to the effective base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Fetch through each source's `internal_base` when one is configured.
    #[serde(default)]
    pub internal_network: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on pages per source; guards against next-link cycles.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Number of sources synced at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// `page[limit]` sent with the listing query.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            internal_network: false,
            timeout_secs: default_timeout_secs(),
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            page_limit: default_page_limit(),
        }
    }
}

fn default_endpoint() -> String {
    "/jsonapi/trust_metadata".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_pages() -> usize {
    500
}
fn default_concurrency() -> usize {
    1
}
fn default_page_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Local vocabulary that remote topic names are matched against.
#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    #[serde(default = "default_vocabulary")]
    pub vocabulary: String,
    /// Terms seeded by `tcs init`.
    #[serde(default)]
    pub terms: Vec<String>,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            vocabulary: default_vocabulary(),
            terms: Vec::new(),
        }
    }
}

fn default_vocabulary() -> String {
    "trust_topics".to_string()
}

/// One remote origin.
///
/// A blank or malformed `public_base` is not rejected here: it surfaces as
/// a configuration error for that source alone at sync time.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub public_base: String,
    #[serde(default)]
    pub internal_base: Option<String>,
}

/// Read, parse, validate, and apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, std::env::var(INTERNAL_NETWORK_ENV).ok().as_deref())?;
    Ok(config)
}

/// Parse and validate a TOML document, without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !config.sync.endpoint.starts_with('/') {
        bail!("sync.endpoint must start with '/'");
    }
    if config.sync.timeout_secs == 0 {
        bail!("sync.timeout_secs must be > 0");
    }
    if config.sync.max_pages == 0 {
        bail!("sync.max_pages must be > 0");
    }
    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be > 0");
    }
    if config.sync.page_limit == 0 {
        bail!("sync.page_limit must be > 0");
    }
    if config.taxonomy.vocabulary.trim().is_empty() {
        bail!("taxonomy.vocabulary must not be empty");
    }

    let mut names = HashSet::new();
    let mut identities: HashMap<String, &str> = HashMap::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            bail!("every [[sources]] entry needs a non-empty name");
        }
        if !names.insert(source.name.as_str()) {
            bail!("duplicate source name: '{}'", source.name);
        }
        // Unusable bases are reported per source at sync time.
        if let Ok(identity) = source_identity(source) {
            if let Some(other) = identities.insert(identity.clone(), &source.name) {
                bail!(
                    "sources '{}' and '{}' share the public base {}",
                    other,
                    source.name,
                    identity
                );
            }
        }
    }

    Ok(())
}

/// Apply the value of [`INTERNAL_NETWORK_ENV`], if set.
pub fn apply_env_overrides(config: &mut Config, internal_network: Option<&str>) -> Result<()> {
    if let Some(raw) = internal_network {
        config.sync.internal_network = parse_flag(raw).with_context(|| {
            format!(
                "{} must be one of 1/0, true/false, yes/no (got '{}')",
                INTERNAL_NETWORK_ENV, raw
            )
        })?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Find a configured source by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}
