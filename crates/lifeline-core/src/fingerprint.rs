//! Prompt fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Normalize a prompt before hashing: trim, collapse whitespace runs, lower-case.
pub fn normalize(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic digest of the normalized prompt.
pub fn fingerprint(prompt: &str) -> String {
    let digest = Sha256::digest(normalize(prompt).as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}
