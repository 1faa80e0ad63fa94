//! Append-only block store.

use crate::config::StoreConfig;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use vellum_types::Block;

/// Column family for blocks, keyed by big-endian block number.
const BLOCKS_CF: &str = "blocks";

/// Meta key holding the current height.
const HEIGHT_KEY: &[u8] = b"chain:height";

/// Error type for block store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    /// A block arrived out of sequence.
    #[error("expected block number [{expected}] but received [{received}]")]
    UnexpectedBlockNumber {
        /// The only number the store would accept.
        expected: u64,
        /// The number that arrived.
        received: u64,
    },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A block failed to encode or decode.
    #[error("block codec error: {0}")]
    Codec(String),
}

/// Append-only log of blocks, keyed by monotonic height.
///
/// The replicated source of truth: on restart, any store lagging this one is
/// rebuilt deterministically from blocks at heights above its own.
pub struct BlockStore {
    db: DB,

    /// Serializes the height check against the append.
    commit_lock: Mutex<()>,

    config: StoreConfig,
}

impl BlockStore {
    /// Open or create a block store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BlockStoreError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: StoreConfig,
    ) -> Result<Self, BlockStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(BLOCKS_CF, Options::default())];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| BlockStoreError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            config,
        })
    }

    /// Append a block. The block's number must be exactly `height() + 1`.
    pub fn commit(&self, block: &Block) -> Result<(), BlockStoreError> {
        let _commit_guard = self.commit_lock.lock().unwrap();
        let start = Instant::now();

        let expected = self.height()? + 1;
        let received = block.number();
        if received != expected {
            return Err(BlockStoreError::UnexpectedBlockNumber { expected, received });
        }

        let blocks_cf = self
            .db
            .cf_handle(BLOCKS_CF)
            .expect("blocks column family must exist");

        let encoded =
            sbor::basic_encode(block).map_err(|e| BlockStoreError::Codec(format!("{e:?}")))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(blocks_cf, received.to_be_bytes(), encoded);
        batch.put(HEIGHT_KEY, received.to_be_bytes());

        // Committed blocks must survive a crash: they are what peers replay.
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| BlockStoreError::DatabaseError(e.to_string()))?;

        let elapsed = start.elapsed().as_secs_f64();
        vellum_metrics::record_store_write(elapsed);
        vellum_metrics::record_store_operation("block_store_commit", elapsed);
        tracing::debug!(number = received, "block persisted");

        Ok(())
    }

    /// Fetch the block committed at `number`, bytewise identical to what was
    /// committed.
    pub fn get(&self, number: u64) -> Result<Option<Block>, BlockStoreError> {
        let start = Instant::now();
        let blocks_cf = self
            .db
            .cf_handle(BLOCKS_CF)
            .expect("blocks column family must exist");

        let result = self
            .db
            .get_cf(blocks_cf, number.to_be_bytes())
            .map_err(|e| BlockStoreError::DatabaseError(e.to_string()))?;
        vellum_metrics::record_store_read(start.elapsed().as_secs_f64());

        result
            .map(|bytes| {
                sbor::basic_decode(&bytes).map_err(|e| BlockStoreError::Codec(format!("{e:?}")))
            })
            .transpose()
    }

    /// The largest committed block number, `0` if empty.
    pub fn height(&self) -> Result<u64, BlockStoreError> {
        let result = self
            .db
            .get(HEIGHT_KEY)
            .map_err(|e| BlockStoreError::DatabaseError(e.to_string()))?;
        Ok(result
            .map(|v| {
                let bytes: [u8; 8] = v.as_slice().try_into().unwrap_or([0; 8]);
                u64::from_be_bytes(bytes)
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vellum_types::{BlockHeader, Hash, Payload, UserAdministrationTx, ValidationInfo};

    fn sample_block(number: u64) -> Block {
        Block {
            header: BlockHeader {
                number,
                validation_info: vec![ValidationInfo::VALID],
                state_root: Hash::ZERO,
            },
            payload: Payload::UserAdministrationTx(vellum_types::UserAdministrationTxEnvelope {
                payload: UserAdministrationTx {
                    user_id: "admin".into(),
                    tx_id: format!("tx-{number}"),
                    user_reads: vec![],
                    user_writes: vec![],
                    user_deletes: vec![],
                },
                signature: vec![],
            }),
        }
    }

    #[test]
    fn test_commit_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.height().unwrap(), 0);

        let block = sample_block(1);
        store.commit(&block).unwrap();

        assert_eq!(store.height().unwrap(), 1);
        assert_eq!(store.get(1).unwrap(), Some(block));
        assert_eq!(store.get(2).unwrap(), None);
    }

    #[test]
    fn test_commit_many_blocks_in_sequence() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();

        for number in 1..=100 {
            store.commit(&sample_block(number)).unwrap();
        }
        assert_eq!(store.height().unwrap(), 100);
        for number in 1..=100 {
            assert_eq!(store.get(number).unwrap(), Some(sample_block(number)));
        }
    }

    #[test]
    fn test_out_of_sequence_block_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();

        let err = store.commit(&sample_block(10)).unwrap_err();
        match &err {
            BlockStoreError::UnexpectedBlockNumber { expected, received } => {
                assert_eq!(*expected, 1);
                assert_eq!(*received, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "expected block number [1] but received [10]"
        );
        assert_eq!(store.height().unwrap(), 0);
    }

    #[test]
    fn test_height_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = BlockStore::open(dir.path()).unwrap();
            store.commit(&sample_block(1)).unwrap();
            store.commit(&sample_block(2)).unwrap();
        }
        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.height().unwrap(), 2);
        assert_eq!(store.get(2).unwrap(), Some(sample_block(2)));
    }
}
