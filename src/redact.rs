//! Short one-way hashes for putting identities and tokens into logs and
//! cache keys without exposing them.

use sha2::{Digest, Sha256};

/// First 6 bytes of SHA-256, hex encoded.
pub fn anon_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Log-safe fingerprint of a secret value.
pub fn fingerprint(secret: &str) -> String {
    format!("sha256:{}", anon_hash(secret))
}
