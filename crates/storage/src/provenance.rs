//! Historical provenance index over writes, reads, and deletes.

use crate::config::StoreConfig;
use crate::keys;
use crate::world_state::StoredEntry;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, WriteOptions, DB};
use sbor::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use vellum_types::{KeyWithVersion, KvWithMetadata, Metadata, Version};

/// Value history per `(db, key)`, keyed by `(db, key, version)`.
const VALUES_CF: &str = "values";

/// Previous/next links per written version, keyed like `values`.
const LINKS_CF: &str = "links";

/// Snapshot of each value at the moment it was deleted.
const DELETED_CF: &str = "deleted";

/// Per-user read index, keyed by `(user, db, key, version)`.
const USER_READS_CF: &str = "user_reads";

/// Per-user tx-id index, keyed by `(user, location)`.
const USER_TXS_CF: &str = "user_txs";

/// Tx-id → block location, keyed by tx id.
const TX_LOCS_CF: &str = "tx_locations";

/// Meta key holding the committed height.
const HEIGHT_KEY: &[u8] = b"provenance:height";

/// Error type for provenance operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    /// A tx id already has a location entry.
    #[error("transaction id [{0}] already exists in the location index")]
    DuplicateTxId(String),

    /// The queried tx id has no location entry.
    #[error("TxID not found: {0}")]
    TxIdNotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A record failed to encode or decode.
    #[error("provenance record codec error: {0}")]
    Codec(String),
}

/// Everything the committer tells the provenance store about one transaction
/// against one database.
///
/// Invalid transactions carry only `tx_id`; they contribute a location entry
/// and nothing else. `old_version_of_writes` holds the version each
/// overwritten key had before this transaction, which becomes the backlink
/// in the value history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxDataForProvenance {
    /// Whether the transaction was validated as `VALID`.
    pub is_valid: bool,
    /// Database the operations target.
    pub db_name: String,
    /// Submitter of record.
    pub user_id: String,
    /// Transaction id.
    pub tx_id: String,
    /// Reads claimed by the transaction.
    pub reads: Vec<KeyWithVersion>,
    /// Writes with their stamped metadata.
    pub writes: Vec<KvWithMetadata>,
    /// Deleted key → the version it held when deleted.
    pub deletes: BTreeMap<String, Version>,
    /// Written key → the version it held before the write.
    pub old_version_of_writes: BTreeMap<String, Version>,
}

impl TxDataForProvenance {
    /// The record for a transaction that failed validation.
    pub fn invalid(tx_id: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            tx_id: tx_id.into(),
            ..Self::default()
        }
    }
}

/// Where a transaction landed in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct TxLocation {
    /// Block the transaction was committed in.
    pub block_num: u64,
    /// Index of the transaction within the block.
    pub tx_index: u64,
}

/// One entry of the per-user reads index, with the read value resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueReadByUser {
    /// Database the read targeted.
    pub db_name: String,
    /// Key that was read.
    pub key: String,
    /// The value as of the read version.
    pub value: Vec<u8>,
    /// The metadata as of the read version.
    pub metadata: Metadata,
}

/// Bi-directional chain links for one written version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BasicSbor)]
struct VersionLink {
    prev: Option<Version>,
    next: Option<Version>,
}

/// Historical index over writes, reads, and deletes.
pub struct ProvenanceStore {
    db: DB,

    /// Serializes link read-modify-write sequences with the batch apply.
    commit_lock: Mutex<()>,

    config: StoreConfig,
}

impl ProvenanceStore {
    /// Open or create a provenance store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProvenanceError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: StoreConfig,
    ) -> Result<Self, ProvenanceError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = [
            VALUES_CF,
            LINKS_CF,
            DELETED_CF,
            USER_READS_CF,
            USER_TXS_CF,
            TX_LOCS_CF,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            config,
        })
    }

    /// Ingest a block's per-transaction records atomically.
    ///
    /// Every distinct tx id receives a location entry, in first-appearance
    /// order (a data tx contributes one record per database it touches, all
    /// sharing one location). Valid records also feed the value history,
    /// version links, deleted-value snapshots, and per-user indices.
    pub fn commit(
        &self,
        block_num: u64,
        tx_data: &[TxDataForProvenance],
    ) -> Result<(), ProvenanceError> {
        let _commit_guard = self.commit_lock.lock().unwrap();
        let start = Instant::now();

        let mut batch = WriteBatch::default();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut tx_index: u64 = 0;

        // Values and links staged in this batch; later records in the same
        // block must observe them (blind-write chains).
        let mut pending_values: HashMap<Vec<u8>, StoredEntry> = HashMap::new();
        let mut pending_links: HashMap<Vec<u8>, VersionLink> = HashMap::new();

        for data in tx_data {
            if seen.insert(&data.tx_id) {
                if self.read_location(&data.tx_id)?.is_some() {
                    return Err(ProvenanceError::DuplicateTxId(data.tx_id.clone()));
                }
                let location = TxLocation {
                    block_num,
                    tx_index,
                };
                let tx_locs_cf = self.cf(TX_LOCS_CF);
                batch.put_cf(tx_locs_cf, data.tx_id.as_bytes(), encode(&location)?);

                if data.is_valid && !data.user_id.is_empty() {
                    let user_txs_cf = self.cf(USER_TXS_CF);
                    let mut key = keys::encode_parts(&[data.user_id.as_bytes()]);
                    key.extend_from_slice(&keys::version_key(Version::new(block_num, tx_index)));
                    batch.put_cf(user_txs_cf, key, data.tx_id.as_bytes());
                }
                tx_index += 1;
            }

            if !data.is_valid {
                continue;
            }

            for kv in &data.writes {
                let value_key = value_key(&data.db_name, &kv.key, kv.metadata.version);
                let stored = StoredEntry {
                    value: kv.value.clone(),
                    metadata: kv.metadata.clone(),
                };
                batch.put_cf(self.cf(VALUES_CF), &value_key, encode(&stored)?);
                pending_values.insert(value_key, stored);

                if let Some(old_version) = data.old_version_of_writes.get(&kv.key) {
                    let new_version = kv.metadata.version;
                    self.stage_link(&mut pending_links, &data.db_name, &kv.key, new_version)?
                        .prev = Some(*old_version);
                    self.stage_link(&mut pending_links, &data.db_name, &kv.key, *old_version)?
                        .next = Some(new_version);
                }
            }

            for (key, deleted_version) in &data.deletes {
                let value_key = value_key(&data.db_name, key, *deleted_version);
                let snapshot = match pending_values.get(&value_key) {
                    Some(stored) => Some(stored.clone()),
                    None => self.read_value_record(&value_key)?,
                };
                // A value that predates provenance tracking has no snapshot
                // to preserve.
                if let Some(stored) = snapshot {
                    let deleted_key = value_key.clone();
                    batch.put_cf(self.cf(DELETED_CF), deleted_key, encode(&stored)?);
                }
            }

            if !data.user_id.is_empty() {
                for read in &data.reads {
                    let version_bytes = read
                        .version
                        .map(|v| keys::version_key(v).to_vec())
                        .unwrap_or_default();
                    let key = keys::encode_parts(&[
                        data.user_id.as_bytes(),
                        data.db_name.as_bytes(),
                        read.key.as_bytes(),
                        &version_bytes,
                    ]);
                    batch.put_cf(self.cf(USER_READS_CF), key, b"");
                }
            }
        }

        for (link_key, link) in pending_links {
            batch.put_cf(self.cf(LINKS_CF), link_key, encode(&link)?);
        }
        batch.put(HEIGHT_KEY, block_num.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;

        let elapsed = start.elapsed().as_secs_f64();
        vellum_metrics::record_store_write(elapsed);
        vellum_metrics::record_store_operation("provenance_commit", elapsed);
        tracing::debug!(block_num, records = tx_data.len(), "provenance committed");

        Ok(())
    }

    /// All committed values of `(db, key)` in increasing version order.
    pub fn get_values(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Vec<(Vec<u8>, Metadata)>, ProvenanceError> {
        let prefix = keys::encode_parts(&[db_name.as_bytes(), key.as_bytes()]);
        self.scan_prefix(VALUES_CF, &prefix)?
            .into_iter()
            .map(|(_, raw)| {
                let stored: StoredEntry = decode(&raw)?;
                Ok((stored.value, stored.metadata))
            })
            .collect()
    }

    /// Walk the previous-version chain from `version`, newest first.
    ///
    /// A negative `limit` means unlimited.
    pub fn get_previous_values(
        &self,
        db_name: &str,
        key: &str,
        version: Version,
        limit: i64,
    ) -> Result<Vec<(Vec<u8>, Metadata)>, ProvenanceError> {
        self.walk_chain(db_name, key, version, limit, |link| link.prev)
    }

    /// Walk the next-version chain from `version`, oldest first.
    ///
    /// A negative `limit` means unlimited.
    pub fn get_next_values(
        &self,
        db_name: &str,
        key: &str,
        version: Version,
        limit: i64,
    ) -> Result<Vec<(Vec<u8>, Metadata)>, ProvenanceError> {
        self.walk_chain(db_name, key, version, limit, |link| link.next)
    }

    /// Snapshots of `(db, key)` values captured at their valid deletes, in
    /// increasing version order.
    pub fn get_deleted_values(
        &self,
        db_name: &str,
        key: &str,
    ) -> Result<Vec<(Vec<u8>, Metadata)>, ProvenanceError> {
        let prefix = keys::encode_parts(&[db_name.as_bytes(), key.as_bytes()]);
        self.scan_prefix(DELETED_CF, &prefix)?
            .into_iter()
            .map(|(_, raw)| {
                let stored: StoredEntry = decode(&raw)?;
                Ok((stored.value, stored.metadata))
            })
            .collect()
    }

    /// Every value a user's transactions claimed to have read, with the read
    /// version resolved against the value history. Reads of absent keys and
    /// of values that predate provenance tracking resolve to nothing.
    pub fn get_values_read_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ValueReadByUser>, ProvenanceError> {
        let prefix = keys::encode_parts(&[user_id.as_bytes()]);
        let mut out = Vec::new();
        for (raw_key, _) in self.scan_prefix(USER_READS_CF, &prefix)? {
            let parts = keys::decode_parts(&raw_key)
                .ok_or_else(|| ProvenanceError::Codec("malformed user-reads key".into()))?;
            let [_, db_part, key_part, version_part] = parts.as_slice() else {
                return Err(ProvenanceError::Codec("malformed user-reads key".into()));
            };
            let Some(version) = keys::version_from_key(version_part) else {
                continue;
            };
            let db_name = String::from_utf8(db_part.clone())
                .map_err(|e| ProvenanceError::Codec(e.to_string()))?;
            let key = String::from_utf8(key_part.clone())
                .map_err(|e| ProvenanceError::Codec(e.to_string()))?;

            if let Some(stored) = self.read_value_record(&value_key(&db_name, &key, version))? {
                out.push(ValueReadByUser {
                    db_name,
                    key,
                    value: stored.value,
                    metadata: stored.metadata,
                });
            }
        }
        Ok(out)
    }

    /// Ids of all valid transactions a user submitted, in commit order.
    pub fn get_tx_ids_submitted_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<String>, ProvenanceError> {
        let prefix = keys::encode_parts(&[user_id.as_bytes()]);
        self.scan_prefix(USER_TXS_CF, &prefix)?
            .into_iter()
            .map(|(_, raw)| {
                String::from_utf8(raw).map_err(|e| ProvenanceError::Codec(e.to_string()))
            })
            .collect()
    }

    /// Where a transaction landed. Fails with [`ProvenanceError::TxIdNotFound`]
    /// for unknown ids.
    pub fn get_tx_id_location(&self, tx_id: &str) -> Result<TxLocation, ProvenanceError> {
        self.read_location(tx_id)?
            .ok_or_else(|| ProvenanceError::TxIdNotFound(tx_id.to_string()))
    }

    /// The committed height, `0` if nothing was committed yet.
    pub fn height(&self) -> Result<u64, ProvenanceError> {
        let result = self
            .db
            .get(HEIGHT_KEY)
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;
        Ok(result
            .map(|v| {
                let bytes: [u8; 8] = v.as_slice().try_into().unwrap_or([0; 8]);
                u64::from_be_bytes(bytes)
            })
            .unwrap_or(0))
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(name)
            .expect("provenance column family must exist")
    }

    fn read_location(&self, tx_id: &str) -> Result<Option<TxLocation>, ProvenanceError> {
        let raw = self
            .db
            .get_cf(self.cf(TX_LOCS_CF), tx_id.as_bytes())
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    fn read_value_record(&self, value_key: &[u8]) -> Result<Option<StoredEntry>, ProvenanceError> {
        let raw = self
            .db
            .get_cf(self.cf(VALUES_CF), value_key)
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    fn read_link(
        &self,
        db_name: &str,
        key: &str,
        version: Version,
    ) -> Result<Option<VersionLink>, ProvenanceError> {
        let raw = self
            .db
            .get_cf(self.cf(LINKS_CF), value_key(db_name, key, version))
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Fetch a link for mutation during commit, preferring the staged copy so
    /// that chains built within a single block see each other.
    fn stage_link<'m>(
        &self,
        pending: &'m mut HashMap<Vec<u8>, VersionLink>,
        db_name: &str,
        key: &str,
        version: Version,
    ) -> Result<&'m mut VersionLink, ProvenanceError> {
        let link_key = value_key(db_name, key, version);
        if !pending.contains_key(&link_key) {
            let existing = self.read_link(db_name, key, version)?.unwrap_or_default();
            pending.insert(link_key.clone(), existing);
        }
        Ok(pending.get_mut(&link_key).expect("link staged above"))
    }

    fn walk_chain(
        &self,
        db_name: &str,
        key: &str,
        version: Version,
        limit: i64,
        step: impl Fn(&VersionLink) -> Option<Version>,
    ) -> Result<Vec<(Vec<u8>, Metadata)>, ProvenanceError> {
        let mut out = Vec::new();
        let mut cursor = self
            .read_link(db_name, key, version)?
            .as_ref()
            .and_then(&step);

        while let Some(current) = cursor {
            if limit >= 0 && out.len() as i64 >= limit {
                break;
            }
            if let Some(stored) = self.read_value_record(&value_key(db_name, key, current))? {
                out.push((stored.value, stored.metadata));
            }
            cursor = self.read_link(db_name, key, current)?.as_ref().and_then(&step);
        }
        Ok(out)
    }

    fn scan_prefix(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ProvenanceError> {
        let cf = self.cf(cf_name);
        let end = keys::next_prefix(prefix).expect("storage key prefix overflow");

        let mut read_opts = rocksdb::ReadOptions::default();
        read_opts.set_iterate_upper_bound(end);
        let mut iter = self.db.raw_iterator_cf_opt(cf, read_opts);
        iter.seek(prefix);

        let mut out = Vec::new();
        while iter.valid() {
            let (Some(key), Some(value)) = (iter.key(), iter.value()) else {
                break;
            };
            out.push((key.to_vec(), value.to_vec()));
            iter.next();
        }
        iter.status()
            .map_err(|e| ProvenanceError::DatabaseError(e.to_string()))?;
        Ok(out)
    }
}

fn value_key(db_name: &str, key: &str, version: Version) -> Vec<u8> {
    let mut out = keys::encode_parts(&[db_name.as_bytes(), key.as_bytes()]);
    out.extend_from_slice(&keys::version_key(version));
    out
}

fn encode<T: BasicEncode>(value: &T) -> Result<Vec<u8>, ProvenanceError> {
    sbor::basic_encode(value).map_err(|e| ProvenanceError::Codec(format!("{e:?}")))
}

fn decode<T: BasicDecode>(bytes: &[u8]) -> Result<T, ProvenanceError> {
    sbor::basic_decode(bytes).map_err(|e| ProvenanceError::Codec(format!("{e:?}")))
}
