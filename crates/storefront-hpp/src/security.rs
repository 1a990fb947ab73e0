//! Constant-time comparison helpers.
//!
//! Used for callback digests and for the `/metrics` bearer token. All
//! comparisons go through the `subtle` crate.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to fixed-length SHA-256 digests before comparison,
/// so timing reveals neither the content nor the length of either input.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Compare two hex digests ignoring ASCII case, in constant time.
///
/// Gateways differ on whether they emit upper- or lowercase hex.
pub fn hex_digest_eq(expected: &str, supplied: &str) -> bool {
    let supplied = supplied.trim().to_ascii_lowercase();
    let expected = expected.to_ascii_lowercase();
    constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}
