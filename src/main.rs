//! # Trusted Content Sync CLI (`tcs`)
//!
//! ## Usage
//!
//! ```bash
//! tcs --config ./config/tcs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tcs init` | Create the SQLite database, run migrations, seed the vocabulary |
//! | `tcs sources` | List configured sources with their effective base URL |
//! | `tcs sync [source]` | Sync every source, or only the one named |
//! | `tcs get <remote_key>` | Print a mirrored reference as JSON |
//! | `tcs stats` | Per-source published / retired / telemetry counts |
//!
//! Per-source failures are reported in the sync summary and logged; the
//! process still exits 0. Only command errors (bad config, unknown source
//! name, unreachable database) exit non-zero.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use trusted_content_sync::{config, get, migrate, sources, stats, sync};

/// Trusted Content Sync CLI: mirror syndicated JSON:API content into a
/// local SQLite store.
#[derive(Parser)]
#[command(
    name = "tcs",
    about = "Trusted Content Sync — incremental mirror of syndicated JSON:API content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tcs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed taxonomy terms.
    ///
    /// Idempotent; safe to run repeatedly.
    Init,

    /// List configured sources, the base each would use, and whether it
    /// resolves.
    Sources {
        /// Resolve bases as if running inside the internal network.
        #[arg(long)]
        internal: bool,
    },

    /// Sync configured sources into the mirror.
    Sync {
        /// Only sync this source (by name).
        source: Option<String>,

        /// Rewrite every existing reference, ignoring change timestamps.
        #[arg(long)]
        full: bool,

        /// Fetch through internal bases, overriding config and environment.
        #[arg(long)]
        internal: bool,
    },

    /// Print a mirrored reference by remote key.
    Get {
        /// Remote key (UUID).
        remote_key: String,
    },

    /// Show mirror statistics.
    Stats,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tcs={level},trusted_content_sync={level},trusted_content_core={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Sources { internal } => {
            sources::list_sources(&cfg, internal.then_some(true))?;
        }
        Commands::Sync {
            source,
            full,
            internal,
        } => {
            let report =
                sync::run_sync(&cfg, source.as_deref(), full, internal.then_some(true)).await?;
            print!("{report}");
            if report.has_errors() {
                tracing::warn!("sync finished with errors; see the summary above");
            }
        }
        Commands::Get { remote_key } => {
            get::run_get(&cfg, &remote_key).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
