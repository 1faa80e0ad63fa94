//! Current-state key-value store (the "world state").

use crate::config::StoreConfig;
use crate::keys;
use crate::WorldStateDelta;
use rocksdb::{ColumnFamilyDescriptor, Options, Snapshot, WriteBatch, WriteOptions, DB};
use sbor::prelude::*;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use vellum_types::{
    ClusterConfig, KvWithMetadata, Metadata, Version, CONFIG_DB_NAME, CONFIG_KEY,
    DATABASES_DB_NAME, USERS_DB_NAME,
};

/// Column family for state entries, keyed by `(db, key)`.
const STATE_CF: &str = "state";

/// Meta key holding the committed height.
const HEIGHT_KEY: &[u8] = b"state:height";

/// Error type for world-state operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldStateError {
    /// A commit arrived below the committed height.
    #[error("commit at height {requested} but the state is already at height {committed}")]
    CommitHeightMismatch {
        /// The store's committed height.
        committed: u64,
        /// The height the commit asked for.
        requested: u64,
    },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An entry failed to encode or decode.
    #[error("state entry codec error: {0}")]
    Codec(String),
}

/// Writes and deletes for one database within a block.
///
/// Writes stay in transaction order; a key written twice keeps both entries
/// and the later one wins at apply time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbUpdates {
    /// Entries to add or overwrite, in transaction order.
    pub writes: Vec<KvWithMetadata>,
    /// Keys to remove.
    pub deletes: Vec<String>,
}

/// A state entry as persisted: value plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub(crate) struct StoredEntry {
    pub(crate) value: Vec<u8>,
    pub(crate) metadata: Metadata,
}

/// Mapping `(db, key) → (value, metadata)` at the latest committed height.
///
/// Holds the three system databases (`_dbs`, `_users`, `_config`) alongside
/// user databases; a user database exists iff it has a row in `_dbs`.
pub struct WorldState {
    db: DB,

    /// Serializes the height check against the batch apply.
    commit_lock: Mutex<()>,

    config: StoreConfig,
}

impl WorldState {
    /// Open or create a world state at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldStateError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: StoreConfig,
    ) -> Result<Self, WorldStateError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(STATE_CF, Options::default())];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| WorldStateError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            config,
        })
    }

    /// Apply a block's delta atomically and stamp the committed height.
    ///
    /// Writes are applied before deletes per database; the committer drops
    /// deletes that a later in-block write superseded. Re-committing at the
    /// current height is allowed (deterministic replay from the block store);
    /// a lower height is a contract violation.
    pub fn commit(&self, delta: &WorldStateDelta, height: u64) -> Result<(), WorldStateError> {
        let _commit_guard = self.commit_lock.lock().unwrap();
        let start = Instant::now();

        let committed = self.height()?;
        if height < committed {
            return Err(WorldStateError::CommitHeightMismatch {
                committed,
                requested: height,
            });
        }

        let state_cf = self
            .db
            .cf_handle(STATE_CF)
            .expect("state column family must exist");

        let mut batch = WriteBatch::default();
        let mut put_count = 0u64;
        let mut delete_count = 0u64;

        for (db_name, updates) in delta {
            for kv in &updates.writes {
                let stored = StoredEntry {
                    value: kv.value.clone(),
                    metadata: kv.metadata.clone(),
                };
                let encoded = sbor::basic_encode(&stored)
                    .map_err(|e| WorldStateError::Codec(format!("{e:?}")))?;
                batch.put_cf(state_cf, state_key(db_name, &kv.key), encoded);
                put_count += 1;
            }
            for key in &updates.deletes {
                batch.delete_cf(state_cf, state_key(db_name, key));
                delete_count += 1;
            }
        }
        batch.put(HEIGHT_KEY, height.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| WorldStateError::DatabaseError(e.to_string()))?;

        let elapsed = start.elapsed().as_secs_f64();
        vellum_metrics::record_store_write(elapsed);
        vellum_metrics::record_store_operation("world_state_commit", elapsed);
        tracing::debug!(height, put_count, delete_count, "world state committed");

        Ok(())
    }

    /// Fetch an entry's value and metadata.
    pub fn get(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Metadata)>, WorldStateError> {
        let start = Instant::now();
        let state_cf = self
            .db
            .cf_handle(STATE_CF)
            .expect("state column family must exist");
        let result = self
            .db
            .get_cf(state_cf, state_key(db_name, key))
            .map_err(|e| WorldStateError::DatabaseError(e.to_string()))?;
        vellum_metrics::record_store_read(start.elapsed().as_secs_f64());

        decode_entry(result)
    }

    /// Fetch an entry's version, if the entry exists.
    pub fn get_version(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Option<Version>, WorldStateError> {
        Ok(self
            .get(db_name, key)?
            .map(|(_, metadata)| metadata.version))
    }

    /// Whether a database exists. System databases always do; a user
    /// database exists iff it is registered in `_dbs`.
    pub fn exists(&self, db_name: &str) -> Result<bool, WorldStateError> {
        if matches!(db_name, DATABASES_DB_NAME | USERS_DB_NAME | CONFIG_DB_NAME) {
            return Ok(true);
        }
        Ok(self.get(DATABASES_DB_NAME, db_name)?.is_some())
    }

    /// Read and decode the committed cluster configuration, if any.
    pub fn get_config(&self) -> Result<Option<(ClusterConfig, Metadata)>, WorldStateError> {
        let Some((value, metadata)) = self.get(CONFIG_DB_NAME, CONFIG_KEY)? else {
            return Ok(None);
        };
        let config: ClusterConfig =
            sbor::basic_decode(&value).map_err(|e| WorldStateError::Codec(format!("{e:?}")))?;
        Ok(Some((config, metadata)))
    }

    /// The committed height, `0` if nothing was committed yet.
    pub fn height(&self) -> Result<u64, WorldStateError> {
        let result = self
            .db
            .get(HEIGHT_KEY)
            .map_err(|e| WorldStateError::DatabaseError(e.to_string()))?;
        Ok(result
            .map(|v| {
                let bytes: [u8; 8] = v.as_slice().try_into().unwrap_or([0; 8]);
                u64::from_be_bytes(bytes)
            })
            .unwrap_or(0))
    }

    /// A frozen read view for query collaborators. Commits that land after
    /// the snapshot was taken are invisible through it.
    pub fn snapshot(&self) -> WorldStateSnapshot<'_> {
        WorldStateSnapshot {
            snapshot: self.db.snapshot(),
            db: &self.db,
        }
    }
}

/// Point-in-time view of the world state, backed by a RocksDB snapshot.
pub struct WorldStateSnapshot<'a> {
    snapshot: Snapshot<'a>,
    db: &'a DB,
}

impl WorldStateSnapshot<'_> {
    /// Fetch an entry's value and metadata as of the snapshot.
    pub fn get(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Metadata)>, WorldStateError> {
        let state_cf = self
            .db
            .cf_handle(STATE_CF)
            .expect("state column family must exist");
        let result = self
            .snapshot
            .get_cf(state_cf, state_key(db_name, key))
            .map_err(|e| WorldStateError::DatabaseError(e.to_string()))?;
        decode_entry(result)
    }

    /// Fetch an entry's version as of the snapshot.
    pub fn get_version(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Option<Version>, WorldStateError> {
        Ok(self
            .get(db_name, key)?
            .map(|(_, metadata)| metadata.version))
    }
}

fn state_key(db_name: &str, key: &str) -> Vec<u8> {
    keys::encode_parts(&[db_name.as_bytes(), key.as_bytes()])
}

fn decode_entry(raw: Option<Vec<u8>>) -> Result<Option<(Vec<u8>, Metadata)>, WorldStateError> {
    raw.map(|bytes| {
        let stored: StoredEntry =
            sbor::basic_decode(&bytes).map_err(|e| WorldStateError::Codec(format!("{e:?}")))?;
        Ok((stored.value, stored.metadata))
    })
    .transpose()
}
