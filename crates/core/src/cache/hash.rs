//! Cache key generation.

use sha2::{Digest, Sha256};

/// Compute the key for a cache entry from its method and canonical URL.
///
/// Callers pass an already canonicalized URL; fragments must be stripped.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
