//! Content hashing for patch submissions.
//!
//! Cache keys are `{instance_id}-{sha256(patch)}`. The digest covers the
//! exact bytes of the patch text; no whitespace or case normalization is
//! applied, so two patches that differ in any byte get distinct keys.

use sha2::{Digest, Sha256};

/// SHA-256 of the patch text, as a lowercase hex string.
pub fn patch_digest(patch: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(patch.as_bytes());
    hex::encode(hasher.finalize())
}

/// Composite cache key for an (instance, patch) pair.
pub fn cache_key(instance_id: &str, patch: &str) -> String {
    format!("{instance_id}-{}", patch_digest(patch))
}
