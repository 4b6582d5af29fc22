//! # Trusted Content Core
//!
//! Shared, I/O-free logic for Trusted Content Sync: the mirror data model,
//! the JSON:API document graph and relation resolver, the identity and
//! staleness engine, and the store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem access.
//! The application crate supplies those and drives the pipeline.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Content references, telemetry records, enumerated trust fields |
//! | [`graph`] | Accumulated primary + included documents with (type, id) index |
//! | [`resolve`] | Relation walking and field extraction per item |
//! | [`identity`] | Deterministic remote keys |
//! | [`staleness`] | Create / update / telemetry-only / skip decisions |
//! | [`store`] | `ReferenceStore` trait and an in-memory implementation |
//! | [`clock`] | Injected time source |
//! | [`error`] | Sync error taxonomy |

pub mod clock;
pub mod error;
pub mod graph;
pub mod identity;
pub mod models;
pub mod resolve;
pub mod staleness;
pub mod store;

pub use error::SyncError;
