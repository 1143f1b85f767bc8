//! Content hashing for content-addressed storage paths.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
