//! # Trusted Content Sync
//!
//! Incremental mirror of syndicated content published as JSON:API resource
//! graphs by one or more remote sites.
//!
//! Each pass fetches a source's paginated listing, resolves the relations
//! every item needs (node, media, file, topics), decides per item whether
//! to create, update, or only record telemetry, and finally retires local
//! references the source no longer lists. Retired references are kept and
//! come back on their next sighting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Fetcher      │──▶│ Resolver     │──▶│ Staleness   │──▶│ SQLite   │
//! │ pages+next   │   │ (type,id) map│   │ + Reconciler│   │ mirror   │
//! └──────────────┘   └──────────────┘   └─────────────┘   └──────────┘
//!        ▲                                                      │
//!        └──────────── Sync orchestrator (per source) ──────────┘
//! ```
//!
//! The I/O-free parts (document graph, resolver, identity, staleness, store
//! trait) live in the `trusted-content-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! tcs init                 # create database, seed vocabulary
//! tcs sources              # check configured sources
//! tcs sync                 # sync every source
//! tcs sync alpha --full    # rewrite one source regardless of timestamps
//! tcs stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`base`] | Internal vs public base URL selection |
//! | [`fetch`] | Paginated listing fetcher |
//! | [`reconcile`] | Applies decisions, appends telemetry, retires |
//! | [`sync`] | Per-source orchestration and reports |
//! | [`sqlite_store`] | SQLite `ReferenceStore` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations and vocabulary seeding |
//! | [`get`], [`stats`], [`sources`] | Reporting commands |

pub mod base;
pub mod config;
pub mod db;
pub mod fetch;
pub mod get;
pub mod migrate;
pub mod reconcile;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod sync;
