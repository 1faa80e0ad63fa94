//! Commit-pipeline error taxonomy.
//!
//! Errors carry the block number and, where it exists, the failing tx id so
//! the replication layer can decide between retry and halt. Store contract
//! violations (`BlockStore` height mismatch, `Provenance` duplicate tx id,
//! `WorldState` height regression, `DeletePrecondition`) are fatal to
//! further commits. Trie mutation failures never reach this type: they are
//! corruption and abort the process.

use vellum_storage::{BlockStoreError, ProvenanceError, WorldStateError};
use vellum_trie::TrieError;

/// Error returned by [`Committer::commit`](crate::Committer::commit).
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Building the block's deltas failed.
    #[error(
        "error while constructing database and provenance entries for block {block_num}{}",
        fmt_tx(.tx_id)
    )]
    ConstructEntries {
        /// The block being committed.
        block_num: u64,
        /// The failing transaction, when attributable.
        tx_id: Option<String>,
        /// The underlying constructor error.
        #[source]
        source: EntryError,
    },

    /// A valid delete targeted a key with no current version. Store contract
    /// violation: the validator guarantees deletes hit live keys.
    #[error(
        "previous version missing for valid delete of [{db_name}/{key}] in block {block_num}"
    )]
    DeletePrecondition {
        /// The block being committed.
        block_num: u64,
        /// Database of the offending delete.
        db_name: String,
        /// Key of the offending delete.
        key: String,
    },

    /// The block store rejected or failed the append.
    #[error("failed to commit block {block_num} to block store")]
    BlockStore {
        /// The block being committed.
        block_num: u64,
        /// The store error.
        #[source]
        source: BlockStoreError,
    },

    /// The provenance store rejected or failed the ingest.
    #[error("failed to commit block {block_num} to provenance store")]
    Provenance {
        /// The block being committed.
        block_num: u64,
        /// The store error.
        #[source]
        source: ProvenanceError,
    },

    /// The world state rejected or failed the commit.
    #[error("failed to commit block {block_num} to state database")]
    WorldState {
        /// The block being committed.
        block_num: u64,
        /// The store error.
        #[source]
        source: WorldStateError,
    },

    /// Persisting the trie checkpoint failed.
    #[error("failed to checkpoint the state trie at height {block_num}")]
    TrieCheckpoint {
        /// The block being committed.
        block_num: u64,
        /// The trie error.
        #[source]
        source: TrieError,
    },

    /// Reading the block store height during startup failed.
    #[error("failed to read the block store height")]
    BlockHeight {
        /// The store error.
        #[source]
        source: BlockStoreError,
    },

    /// Reconstructing the trie at startup failed.
    #[error("failed to load the state trie at height {height}")]
    TrieLoad {
        /// The block store height the load targeted.
        height: u64,
        /// The trie error.
        #[source]
        source: TrieError,
    },
}

impl CommitError {
    /// Wrap a constructor error, promoting delete-precondition failures to
    /// their own store-contract variant.
    pub(crate) fn from_entry(block_num: u64, tx_id: Option<String>, source: EntryError) -> Self {
        match source {
            EntryError::DeletePrecondition { db_name, key } => CommitError::DeletePrecondition {
                block_num,
                db_name,
                key,
            },
            source => CommitError::ConstructEntries {
                block_num,
                tx_id,
                source,
            },
        }
    }
}

fn fmt_tx(tx_id: &Option<String>) -> String {
    match tx_id {
        Some(id) => format!(" (tx [{id}])"),
        None => String::new(),
    }
}

/// Error from the pure entry constructors.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// An index schema failed to serialize to JSON.
    #[error("error while marshaling index for database [{db_name}]")]
    IndexSerialization {
        /// The database whose schema failed.
        db_name: String,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A record failed to serialize.
    #[error("error while marshaling the record for [{key}]: {detail}")]
    RecordSerialization {
        /// Key of the record.
        key: String,
        /// Encoder diagnostics.
        detail: String,
    },

    /// A valid delete resolved to no previous version.
    #[error("previous version missing for valid delete of [{db_name}/{key}]")]
    DeletePrecondition {
        /// Database of the offending delete.
        db_name: String,
        /// Key of the offending delete.
        key: String,
    },

    /// Reading the world state during construction failed.
    #[error("error while reading the world state")]
    WorldState(#[from] WorldStateError),
}
