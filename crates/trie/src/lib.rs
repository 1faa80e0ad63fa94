//! Merkle-Patricia state trie for the Vellum ledger.
//!
//! The trie maps composite `(db-name, key)` keys to value bytes and exposes
//! an incremental `update`/`delete`/`hash`/`commit` API. Its root hash is the
//! cryptographic summary of the world state that every replica stamps into
//! the block header; two replicas that applied the same block sequence hold
//! identical roots.
//!
//! Subtrees that have been checkpointed are represented by `Hash` nodes and
//! resolved from the [`TrieStore`] on demand, so a freshly loaded trie is one
//! hash node deep and faults in only the paths a block actually touches.
//! Failure to resolve a node the trie points at is state corruption, not an
//! ordinary error.

#![warn(missing_docs)]

mod nibbles;
mod node;
mod store;
mod trie;

pub use nibbles::Nibbles;
pub use store::{MemTrieStore, RocksTrieStore, TrieStore, TrieStoreConfig, TrieStoreError};
pub use trie::{StateTrie, TrieError};

/// Build the deterministic, prefix-free trie key for a world-state entry.
///
/// Each part is prefixed with its big-endian `u32` length, so no composite
/// key is a prefix of another and `(db, key)` pairs never collide.
pub fn composite_key(db_name: &str, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + db_name.len() + key.len());
    out.extend_from_slice(&(db_name.len() as u32).to_be_bytes());
    out.extend_from_slice(db_name.as_bytes());
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key_is_deterministic() {
        assert_eq!(composite_key("db1", "k1"), composite_key("db1", "k1"));
    }

    #[test]
    fn test_composite_key_separates_parts() {
        // Same concatenated bytes, different split points.
        assert_ne!(composite_key("ab", "c"), composite_key("a", "bc"));
        assert_ne!(composite_key("", "abc"), composite_key("abc", ""));
    }

    #[test]
    fn test_composite_key_is_prefix_free() {
        let a = composite_key("db1", "key");
        let b = composite_key("db1", "key-longer");
        assert!(!b.starts_with(&a));
        assert!(!a.starts_with(&b));
    }
}
