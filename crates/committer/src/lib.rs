//! Block commit pipeline for the Vellum ledger.
//!
//! Given a block whose per-transaction verdicts are already set, the
//! [`Committer`] constructs the block's world-state and provenance deltas,
//! applies the world-state delta to the Merkle-Patricia trie, stamps the
//! resulting root into the block header, and then persists in a fixed order:
//! block store, provenance store, world state, trie checkpoint.
//!
//! The block store leads because it is the replicated log: after a crash,
//! any store lagging it can be rebuilt deterministically from blocks at
//! heights above its own. Readers that need consistent state should wait on
//! the world-state height, not the block-store height.

#![warn(missing_docs)]

mod committer;
mod entries;
mod errors;
mod identity;

pub use committer::{apply_block_on_state_trie, load_state_trie, Committer};
pub use errors::{CommitError, EntryError};
