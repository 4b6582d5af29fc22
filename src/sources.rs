//! `tcs sources`: configured sources with the base each would use.

use anyhow::Result;

use crate::base::resolve_base;
use crate::config::Config;

/// One row of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: String,
    /// Base requests go to, or the configuration problem.
    pub base: String,
    pub mode: &'static str,
    pub healthy: bool,
}

pub fn source_statuses(config: &Config, internal_network: bool) -> Vec<SourceStatus> {
    config
        .sources
        .iter()
        .map(|source| match resolve_base(source, internal_network) {
            Ok(base) => SourceStatus {
                name: source.name.clone(),
                mode: if base.is_internal() { "internal" } else { "public" },
                base: base.request_base,
                healthy: true,
            },
            Err(e) => SourceStatus {
                name: source.name.clone(),
                base: e.to_string(),
                mode: "-",
                healthy: false,
            },
        })
        .collect()
}

pub fn list_sources(config: &Config, internal: Option<bool>) -> Result<()> {
    let internal_network = internal.unwrap_or(config.sync.internal_network);
    let statuses = source_statuses(config, internal_network);

    if statuses.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<16} {:<10} {:<8} BASE", "SOURCE", "MODE", "HEALTHY");
    for s in &statuses {
        println!("{:<16} {:<10} {:<8} {}", s.name, s.mode, s.healthy, s.base);
    }
    Ok(())
}
