//! Content fingerprints for cache keys.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest over `parts`, in order.
///
/// Parts are length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn digest_parts<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .fold(Sha256::new(), |hasher, part| {
            let part = part.as_ref();
            hasher
                .chain_update((part.len() as u64).to_le_bytes())
                .chain_update(part.as_bytes())
        })
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
