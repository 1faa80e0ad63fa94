//! Persistent stores for the Vellum ledger.
//!
//! Three RocksDB-backed stores, each over its own directory with a
//! store-private format:
//!
//! - [`BlockStore`]: append-only log of blocks keyed by monotonic height.
//!   This is the replicated source of truth; every other store can be rebuilt
//!   deterministically from blocks at heights above its own.
//! - [`WorldState`]: current `(db, key) → (value, metadata)` mapping with
//!   atomic multi-database commit stamped by block height.
//! - [`ProvenanceStore`]: historical index over writes, reads, and deletes
//!   with previous/next version links and per-user indices.
//!
//! All operations are synchronous blocking I/O, matching the single-writer
//! commit pipeline. Stores take `&self`; RocksDB handles synchronization
//! internally and a per-store commit lock serializes read-modify-write
//! commit sequences.

#![warn(missing_docs)]

mod block_store;
mod config;
pub mod keys;
mod provenance;
mod world_state;

pub use block_store::{BlockStore, BlockStoreError};
pub use config::StoreConfig;
pub use provenance::{
    ProvenanceError, ProvenanceStore, TxDataForProvenance, TxLocation, ValueReadByUser,
};
pub use world_state::{DbUpdates, WorldState, WorldStateError, WorldStateSnapshot};

use std::collections::BTreeMap;

/// Per-block world-state delta: database name → its writes and deletes.
///
/// `BTreeMap` keeps cross-database iteration deterministic, which matters
/// because the committer feeds this delta to the state trie.
pub type WorldStateDelta = BTreeMap<String, DbUpdates>;
