//! The committer: drives a validated block through the four stores.

use crate::entries::{self, BlockDeltas, DirtyWrites};
use crate::errors::CommitError;
use crate::identity;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, Level};
use vellum_storage::{
    BlockStore, ProvenanceStore, TxDataForProvenance, WorldState, WorldStateDelta,
};
use vellum_trie::{composite_key, StateTrie, TrieError, TrieStore};
use vellum_types::{Block, Flag, Payload, Version, CONFIG_DB_NAME, DATABASES_DB_NAME, USERS_DB_NAME};

/// Single-tx payload kinds always sit at index 0 of their block.
const USER_ADMIN_TX_INDEX: u64 = 0;
const DB_ADMIN_TX_INDEX: u64 = 0;
const CONFIG_TX_INDEX: u64 = 0;

/// Orchestrates the commit of one block across the block store, provenance
/// store, world state, and state trie.
///
/// Single-writer: upstream serializes blocks by height and at most one
/// `commit` runs at a time. The committer owns the trie; the three stores
/// are shared with query collaborators.
pub struct Committer<S> {
    block_store: Arc<BlockStore>,
    world_state: Arc<WorldState>,
    provenance_store: Arc<ProvenanceStore>,
    state_trie: StateTrie<S>,
}

impl<S: TrieStore> Committer<S> {
    /// Assemble a committer over its collaborators.
    pub fn new(
        block_store: Arc<BlockStore>,
        world_state: Arc<WorldState>,
        provenance_store: Arc<ProvenanceStore>,
        state_trie: StateTrie<S>,
    ) -> Self {
        Self {
            block_store,
            world_state,
            provenance_store,
            state_trie,
        }
    }

    /// Root hash of the state trie as currently held in memory.
    pub fn state_trie_root(&self) -> vellum_types::Hash {
        self.state_trie.hash()
    }

    /// Commit a validated block.
    ///
    /// Stamps `block.header.state_root`, then persists in the fixed order
    /// block store → provenance → world state → trie checkpoint. Errors are
    /// returned with block context; the caller decides retry vs halt. Not
    /// cancellable once the trie has been mutated.
    ///
    /// # Panics
    ///
    /// Panics if applying the delta to the trie fails: the in-memory trie
    /// and the trie store have diverged and replication cannot heal a
    /// corrupted replica locally.
    #[instrument(level = Level::DEBUG, skip_all, fields(block_num = block.number()))]
    pub fn commit(&mut self, block: &mut Block) -> Result<(), CommitError> {
        let start = Instant::now();
        let block_num = block.number();

        // Expected changes to the world state and the provenance store.
        let deltas = self.construct_entries(block)?;

        // The trie must mirror the delta exactly; a failure here leaves no
        // way to recompute the root this replica promised the network.
        if let Err(err) = apply_block_on_state_trie(&mut self.state_trie, &deltas.world) {
            panic!("state corruption while applying block {block_num} to the state trie: {err}");
        }
        let state_root = self.state_trie.hash();
        block.header.state_root = state_root;

        self.block_store
            .commit(block)
            .map_err(|source| CommitError::BlockStore { block_num, source })?;

        self.provenance_store
            .commit(block_num, &deltas.provenance)
            .map_err(|source| CommitError::Provenance { block_num, source })?;

        self.world_state
            .commit(&deltas.world, block_num)
            .map_err(|source| CommitError::WorldState { block_num, source })?;

        self.state_trie
            .commit(block_num)
            .map_err(|source| CommitError::TrieCheckpoint { block_num, source })?;

        let elapsed = start.elapsed().as_secs_f64();
        vellum_metrics::record_block_committed(block_num, elapsed);
        tracing::debug!(block_num, state_root = %state_root, "block committed");

        Ok(())
    }

    /// Dispatch on the payload kind and produce the block's deltas.
    fn construct_entries(&self, block: &Block) -> Result<BlockDeltas, CommitError> {
        let block_num = block.number();
        let validation_info = &block.header.validation_info;
        let mut deltas = BlockDeltas::empty();

        match &block.payload {
            Payload::DataTxs(envelopes) => {
                // The dirty-write map is shared across the block so later
                // transactions resolve old versions against in-block writes.
                let mut dirty_writes = DirtyWrites::new();

                for (tx_num, envelope) in envelopes.iter().enumerate() {
                    let tx = &envelope.payload;
                    if !tx_flag(validation_info, tx_num).is_valid() {
                        deltas
                            .provenance
                            .push(TxDataForProvenance::invalid(tx.tx_id.clone()));
                        continue;
                    }

                    let version = Version::new(block_num, tx_num as u64);

                    let records = entries::construct_provenance_entries_for_data_tx(
                        &self.world_state,
                        tx,
                        version,
                        &dirty_writes,
                    )
                    .map_err(|e| {
                        CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e)
                    })?;
                    deltas.provenance.extend(records);

                    entries::add_db_entries_for_data_tx(
                        tx,
                        version,
                        &mut deltas.world,
                        &mut dirty_writes,
                    );
                }
                tracing::debug!(
                    block_num,
                    txs = envelopes.len(),
                    "constructed updates for data transactions"
                );
            }

            Payload::UserAdministrationTx(envelope) => {
                let tx = &envelope.payload;
                if !tx_flag(validation_info, USER_ADMIN_TX_INDEX as usize).is_valid() {
                    deltas
                        .provenance
                        .push(TxDataForProvenance::invalid(tx.tx_id.clone()));
                    return Ok(deltas);
                }

                let version = Version::new(block_num, USER_ADMIN_TX_INDEX);
                let updates = identity::construct_db_entries_for_user_admin_tx(tx, version)
                    .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e))?;
                let record = identity::construct_provenance_entries_for_user_admin_tx(
                    &self.world_state,
                    tx,
                    version,
                )
                .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e))?;

                deltas.world.insert(USERS_DB_NAME.to_string(), updates);
                deltas.provenance.push(record);
                tracing::debug!(block_num, "constructed user admin update");
            }

            Payload::DbAdministrationTx(envelope) => {
                let tx = &envelope.payload;
                if !tx_flag(validation_info, DB_ADMIN_TX_INDEX as usize).is_valid() {
                    deltas
                        .provenance
                        .push(TxDataForProvenance::invalid(tx.tx_id.clone()));
                    return Ok(deltas);
                }

                let version = Version::new(block_num, DB_ADMIN_TX_INDEX);
                let updates = entries::construct_db_entries_for_db_admin_tx(tx, version)
                    .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e))?;
                let record = entries::construct_provenance_entries_for_db_admin_tx(
                    &self.world_state,
                    tx,
                    &updates,
                )
                .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e))?;

                deltas.world.insert(DATABASES_DB_NAME.to_string(), updates);
                deltas.provenance.push(record);
                tracing::debug!(block_num, "constructed db admin update");
            }

            Payload::ConfigTx(envelope) => {
                let tx = &envelope.payload;
                if !tx_flag(validation_info, CONFIG_TX_INDEX as usize).is_valid() {
                    deltas
                        .provenance
                        .push(TxDataForProvenance::invalid(tx.tx_id.clone()));
                    return Ok(deltas);
                }

                let version = Version::new(block_num, CONFIG_TX_INDEX);
                // The first config block commits against an empty old config.
                let old_config = self
                    .world_state
                    .get_config()
                    .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e.into()))?
                    .map(|(config, _)| config)
                    .unwrap_or_default();

                let config_entries =
                    entries::construct_db_entries_for_config_tx(tx, &old_config, version)
                        .map_err(|e| {
                            CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e)
                        })?;
                let records = entries::construct_provenance_entries_for_config_tx(
                    &self.world_state,
                    tx,
                    &config_entries,
                )
                .map_err(|e| CommitError::from_entry(block_num, Some(tx.tx_id.clone()), e))?;
                deltas.provenance.extend(records);

                // Node records land in `_config` next to the config record.
                let mut config_updates = config_entries.config_updates;
                config_updates
                    .writes
                    .extend(config_entries.node_updates.writes);
                config_updates
                    .deletes
                    .extend(config_entries.node_updates.deletes);
                deltas
                    .world
                    .insert(CONFIG_DB_NAME.to_string(), config_updates);

                let admin_updates = config_entries.admin_updates;
                if !admin_updates.writes.is_empty() || !admin_updates.deletes.is_empty() {
                    deltas.world.insert(USERS_DB_NAME.to_string(), admin_updates);
                }
                tracing::debug!(block_num, "constructed configuration update");
            }
        }

        Ok(deltas)
    }
}

/// The verdict for tx `index`, treating anything missing or unknown as
/// "not VALID".
fn tx_flag(validation_info: &[vellum_types::ValidationInfo], index: usize) -> Flag {
    validation_info
        .get(index)
        .map(|v| v.flag)
        .unwrap_or(Flag::InvalidIncorrectEntries)
}

/// Apply a block's world-state delta to the trie: updates first, then
/// deletes, per database, under composite keys.
pub fn apply_block_on_state_trie<S: TrieStore>(
    trie: &mut StateTrie<S>,
    delta: &WorldStateDelta,
) -> Result<(), TrieError> {
    for (db_name, updates) in delta {
        for kv in &updates.writes {
            trie.update(&composite_key(db_name, &kv.key), kv.value.clone())?;
        }
        for key in &updates.deletes {
            trie.delete(&composite_key(db_name, key))?;
        }
    }
    Ok(())
}

/// Reconstruct the state trie as of the block store's current height.
///
/// Run at startup before the first commit; a fresh deployment (height 0)
/// yields an empty trie.
pub fn load_state_trie<S: TrieStore>(
    trie_store: S,
    block_store: &BlockStore,
) -> Result<StateTrie<S>, CommitError> {
    let height = block_store
        .height()
        .map_err(|source| CommitError::BlockHeight { source })?;
    StateTrie::load(trie_store, height).map_err(|source| CommitError::TrieLoad { height, source })
}
