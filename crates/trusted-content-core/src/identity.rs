//! Deterministic identity for mirrored items.
//!
//! The remote key is derived only from the source's public identity and the
//! remote item id, so the same item maps to the same key across passes,
//! processes, and whichever base URL (internal or public) served it.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derive the remote key for `(source_identity, remote_item_id)`.
///
/// SHA-256 over `"{source_identity}:{remote_item_id}"`; the first 16 bytes
/// become a version-8 (custom) UUID string.
pub fn remote_key(source_identity: &str, remote_item_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_identity.as_bytes());
    hasher.update(b":");
    hasher.update(remote_item_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::new_v8(bytes).to_string()
}
