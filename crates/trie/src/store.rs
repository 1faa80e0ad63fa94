//! Trie persistence: content-addressed node storage checkpointed by height.

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, WriteOptions, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use vellum_types::Hash;

/// Column family for trie nodes, keyed by node hash.
const NODES_CF: &str = "nodes";

/// Column family for root hashes, keyed by big-endian block height.
const ROOTS_CF: &str = "roots";

/// Meta key holding the latest checkpointed height.
const HEIGHT_KEY: &[u8] = b"trie:height";

/// Error type for trie store operations.
#[derive(Debug, thiserror::Error)]
pub enum TrieStoreError {
    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Backing store for checkpointed trie nodes.
///
/// Nodes are content-addressed by their merkle hash and never rewritten, so
/// a hash that exists in the store implies its entire subtree does too.
pub trait TrieStore {
    /// Fetch the encoded node stored under `hash`.
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieStoreError>;

    /// Whether a node with this hash has been persisted.
    fn contains_node(&self, hash: &Hash) -> Result<bool, TrieStoreError>;

    /// Atomically persist new nodes and record `root` as the trie root at
    /// `height`, advancing the checkpointed height.
    fn commit(&self, height: u64, root: Hash, nodes: &[(Hash, Vec<u8>)])
        -> Result<(), TrieStoreError>;

    /// The root hash checkpointed at `height`, if any.
    fn root_at(&self, height: u64) -> Result<Option<Hash>, TrieStoreError>;

    /// The latest checkpointed height, `0` if none.
    fn height(&self) -> Result<u64, TrieStoreError>;
}

/// Configuration for [`RocksTrieStore`].
#[derive(Debug, Clone)]
pub struct TrieStoreConfig {
    /// Whether to fsync checkpoint writes.
    pub sync_writes: bool,
}

impl Default for TrieStoreConfig {
    fn default() -> Self {
        Self { sync_writes: true }
    }
}

/// RocksDB-backed trie store for production use.
pub struct RocksTrieStore {
    db: DB,

    /// Serializes checkpoint writes so height reads never interleave with a
    /// half-applied batch.
    commit_lock: Mutex<()>,

    config: TrieStoreConfig,
}

impl RocksTrieStore {
    /// Open or create a trie store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrieStoreError> {
        Self::open_with_config(path, TrieStoreConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: TrieStoreConfig,
    ) -> Result<Self, TrieStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(NODES_CF, Options::default()),
            ColumnFamilyDescriptor::new(ROOTS_CF, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| TrieStoreError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            config,
        })
    }
}

impl TrieStore for RocksTrieStore {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieStoreError> {
        let start = Instant::now();
        let cf = self
            .db
            .cf_handle(NODES_CF)
            .expect("nodes column family must exist");
        let result = self
            .db
            .get_cf(cf, hash.as_bytes())
            .map_err(|e| TrieStoreError::DatabaseError(e.to_string()))?;
        vellum_metrics::record_store_read(start.elapsed().as_secs_f64());
        Ok(result)
    }

    fn contains_node(&self, hash: &Hash) -> Result<bool, TrieStoreError> {
        Ok(self.get_node(hash)?.is_some())
    }

    fn commit(
        &self,
        height: u64,
        root: Hash,
        nodes: &[(Hash, Vec<u8>)],
    ) -> Result<(), TrieStoreError> {
        let _commit_guard = self.commit_lock.lock().unwrap();
        let start = Instant::now();

        let nodes_cf = self
            .db
            .cf_handle(NODES_CF)
            .expect("nodes column family must exist");
        let roots_cf = self
            .db
            .cf_handle(ROOTS_CF)
            .expect("roots column family must exist");

        let mut batch = WriteBatch::default();
        for (hash, encoded) in nodes {
            batch.put_cf(nodes_cf, hash.as_bytes(), encoded);
        }
        batch.put_cf(roots_cf, height.to_be_bytes(), root.as_bytes());
        batch.put(HEIGHT_KEY, height.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| TrieStoreError::DatabaseError(e.to_string()))?;

        let elapsed = start.elapsed().as_secs_f64();
        vellum_metrics::record_store_write(elapsed);
        vellum_metrics::record_store_operation("trie_checkpoint", elapsed);
        tracing::debug!(height, root = %root, nodes = nodes.len(), "trie checkpoint persisted");

        Ok(())
    }

    fn root_at(&self, height: u64) -> Result<Option<Hash>, TrieStoreError> {
        let cf = self
            .db
            .cf_handle(ROOTS_CF)
            .expect("roots column family must exist");
        let result = self
            .db
            .get_cf(cf, height.to_be_bytes())
            .map_err(|e| TrieStoreError::DatabaseError(e.to_string()))?;
        Ok(result.map(|bytes| Hash::from_hash_bytes(&bytes)))
    }

    fn height(&self) -> Result<u64, TrieStoreError> {
        let result = self
            .db
            .get(HEIGHT_KEY)
            .map_err(|e| TrieStoreError::DatabaseError(e.to_string()))?;
        Ok(result
            .map(|v| {
                let bytes: [u8; 8] = v.as_slice().try_into().unwrap_or([0; 8]);
                u64::from_be_bytes(bytes)
            })
            .unwrap_or(0))
    }
}

/// In-memory trie store for tests and simulation.
#[derive(Debug, Default)]
pub struct MemTrieStore {
    inner: Mutex<MemTrieStoreInner>,
}

#[derive(Debug, Default)]
struct MemTrieStoreInner {
    nodes: HashMap<Hash, Vec<u8>>,
    roots: HashMap<u64, Hash>,
    height: u64,
}

impl MemTrieStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrieStore for MemTrieStore {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieStoreError> {
        Ok(self.inner.lock().unwrap().nodes.get(hash).cloned())
    }

    fn contains_node(&self, hash: &Hash) -> Result<bool, TrieStoreError> {
        Ok(self.inner.lock().unwrap().nodes.contains_key(hash))
    }

    fn commit(
        &self,
        height: u64,
        root: Hash,
        nodes: &[(Hash, Vec<u8>)],
    ) -> Result<(), TrieStoreError> {
        let mut inner = self.inner.lock().unwrap();
        for (hash, encoded) in nodes {
            inner.nodes.insert(*hash, encoded.clone());
        }
        inner.roots.insert(height, root);
        inner.height = height;
        Ok(())
    }

    fn root_at(&self, height: u64) -> Result<Option<Hash>, TrieStoreError> {
        Ok(self.inner.lock().unwrap().roots.get(&height).copied())
    }

    fn height(&self) -> Result<u64, TrieStoreError> {
        Ok(self.inner.lock().unwrap().height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roundtrip_store(store: &dyn TrieStore) {
        let hash = Hash::from_bytes(b"node");
        assert!(!store.contains_node(&hash).unwrap());

        store
            .commit(1, Hash::from_bytes(b"root"), &[(hash, b"encoded".to_vec())])
            .unwrap();

        assert!(store.contains_node(&hash).unwrap());
        assert_eq!(store.get_node(&hash).unwrap(), Some(b"encoded".to_vec()));
        assert_eq!(store.height().unwrap(), 1);
        assert_eq!(store.root_at(1).unwrap(), Some(Hash::from_bytes(b"root")));
        assert_eq!(store.root_at(2).unwrap(), None);
    }

    #[test]
    fn test_mem_store_roundtrip() {
        roundtrip_store(&MemTrieStore::new());
    }

    #[test]
    fn test_rocks_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = RocksTrieStore::open(dir.path()).unwrap();
        roundtrip_store(&store);
    }

    #[test]
    fn test_rocks_store_height_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksTrieStore::open(dir.path()).unwrap();
            store.commit(3, Hash::from_bytes(b"r3"), &[]).unwrap();
        }
        let store = RocksTrieStore::open(dir.path()).unwrap();
        assert_eq!(store.height().unwrap(), 3);
        assert_eq!(store.root_at(3).unwrap(), Some(Hash::from_bytes(b"r3")));
    }
}
