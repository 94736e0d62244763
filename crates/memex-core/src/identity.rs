//! Stable document identity.
//!
//! Note ids are a SHA-256 digest over the note's immutable identity fields,
//! so they are identical across runs, machines and toolchains. Content is
//! deliberately not part of the digest: editing a note keeps its id.

use sha2::{Digest, Sha256};

/// Unit separator placed between fields so `("ab", "c")` and `("a", "bc")`
/// hash differently.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Compute the id of a note from its trimmed title and creation timestamp.
///
/// # Example
///
/// ```rust
/// use memex_core::identity::note_id;
///
/// let a = note_id("Trip", "2024-01-01");
/// assert_eq!(a, note_id("Trip", "2024-01-01"));
/// assert_ne!(a, note_id("Trip", "2024-01-02"));
/// assert_eq!(a.len(), 64);
/// ```
pub fn note_id(title: &str, created: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(created.as_bytes());
    format!("{:x}", hasher.finalize())
}
