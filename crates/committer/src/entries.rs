//! Entry constructors: pure functions turning transactions into store deltas.

use crate::errors::EntryError;
use std::collections::HashMap;
use vellum_storage::{DbUpdates, TxDataForProvenance, WorldState, WorldStateDelta};
use vellum_types::{
    ClusterConfig, ConfigTx, DataTx, DbAdministrationTx, KeyWithVersion, KvWithMetadata, Metadata,
    Version, CONFIG_DB_NAME, CONFIG_KEY, DATABASES_DB_NAME,
};

/// Latest in-block version per `(db, key)`, shared across one block's
/// transactions so blind-write chains link to the in-block predecessor
/// instead of the pre-block value. Lifetime: one commit call.
pub(crate) type DirtyWrites = HashMap<(String, String), Version>;

/// Resolve a key's current version: the dirty-write map first, then the
/// world state.
pub(crate) fn version_lookup(
    world_state: &WorldState,
    dirty_writes: &DirtyWrites,
    db_name: &str,
    key: &str,
) -> Result<Option<Version>, EntryError> {
    if let Some(version) = dirty_writes.get(&(db_name.to_string(), key.to_string())) {
        return Ok(Some(*version));
    }
    Ok(world_state.get_version(db_name, key)?)
}

/// Build the provenance records for one valid data tx: one record per
/// database operation.
///
/// Old versions are resolved against the block's dirty writes before the
/// world state, and before this tx's own writes enter the dirty map, so all
/// operations of the tx observe the pre-tx view.
pub(crate) fn construct_provenance_entries_for_data_tx(
    world_state: &WorldState,
    tx: &DataTx,
    version: Version,
    dirty_writes: &DirtyWrites,
) -> Result<Vec<TxDataForProvenance>, EntryError> {
    let user_id = tx.must_sign_user_ids.first().cloned().unwrap_or_default();

    // Even an operation-less tx must surface in the tx-id location index.
    if tx.db_operations.is_empty() {
        return Ok(vec![TxDataForProvenance {
            is_valid: true,
            user_id,
            tx_id: tx.tx_id.clone(),
            ..Default::default()
        }]);
    }

    let mut records = Vec::with_capacity(tx.db_operations.len());

    for ops in &tx.db_operations {
        let mut record = TxDataForProvenance {
            is_valid: true,
            db_name: ops.db_name.clone(),
            user_id: user_id.clone(),
            tx_id: tx.tx_id.clone(),
            ..Default::default()
        };

        for read in &ops.data_reads {
            record.reads.push(KeyWithVersion {
                key: read.key.clone(),
                version: read.version,
            });
        }

        for write in &ops.data_writes {
            record.writes.push(KvWithMetadata {
                key: write.key.clone(),
                value: write.value.clone(),
                metadata: Metadata {
                    version,
                    access_control: write.acl.clone(),
                },
            });

            // Two or more transactions in a block can blind-write the same
            // key; the backlink must point at the last in-block write, not
            // at the world state.
            if let Some(old_version) =
                version_lookup(world_state, dirty_writes, &ops.db_name, &write.key)?
            {
                record
                    .old_version_of_writes
                    .insert(write.key.clone(), old_version);
            }
        }

        for delete in &ops.data_deletes {
            // A blind delete can follow an in-block write of the same key,
            // so the dirty set is consulted before the world state.
            let old_version =
                version_lookup(world_state, dirty_writes, &ops.db_name, &delete.key)?.ok_or(
                    EntryError::DeletePrecondition {
                        db_name: ops.db_name.clone(),
                        key: delete.key.clone(),
                    },
                )?;
            record.deletes.insert(delete.key.clone(), old_version);
        }

        records.push(record);
    }

    Ok(records)
}

/// Fold one valid data tx into the block's world-state delta and advance the
/// dirty-write map.
pub(crate) fn add_db_entries_for_data_tx(
    tx: &DataTx,
    version: Version,
    delta: &mut WorldStateDelta,
    dirty_writes: &mut DirtyWrites,
) {
    for ops in &tx.db_operations {
        let updates = delta.entry(ops.db_name.clone()).or_default();

        for write in &ops.data_writes {
            // A write supersedes any pending in-block delete of the same
            // key; the world state, trie, and provenance all agree on
            // last-operation-wins.
            updates.deletes.retain(|key| key != &write.key);
            updates.writes.push(KvWithMetadata {
                key: write.key.clone(),
                value: write.value.clone(),
                metadata: Metadata {
                    version,
                    access_control: write.acl.clone(),
                },
            });
            dirty_writes.insert((ops.db_name.clone(), write.key.clone()), version);
        }

        for delete in &ops.data_deletes {
            updates.deletes.push(delete.key.clone());
        }
    }
}

/// Build the `_dbs` delta for a valid db-admin tx.
///
/// Creations consume their index schema from `dbs_index`; the remaining
/// entries re-index existing databases. Empty, null, or missing schemas
/// encode as empty bytes, present schemas as JSON of the attribute→type map.
pub(crate) fn construct_db_entries_for_db_admin_tx(
    tx: &DbAdministrationTx,
    version: Version,
) -> Result<DbUpdates, EntryError> {
    let mut dbs_index = tx.dbs_index.clone();
    let mut writes = Vec::with_capacity(tx.create_dbs.len() + dbs_index.len());

    for db_name in &tx.create_dbs {
        let value = match dbs_index.remove(db_name).flatten() {
            Some(index) if !index.attribute_and_type.is_empty() => {
                serde_json::to_vec(&index.attribute_and_type).map_err(|source| {
                    EntryError::IndexSerialization {
                        db_name: db_name.clone(),
                        source,
                    }
                })?
            }
            _ => Vec::new(),
        };
        writes.push(KvWithMetadata {
            key: db_name.clone(),
            value,
            metadata: Metadata::with_version(version),
        });
    }

    for (db_name, index) in dbs_index {
        let value = match index {
            Some(index) if !index.attribute_and_type.is_empty() => {
                serde_json::to_vec(&index.attribute_and_type).map_err(|source| {
                    EntryError::IndexSerialization {
                        db_name: db_name.clone(),
                        source,
                    }
                })?
            }
            _ => Vec::new(),
        };
        writes.push(KvWithMetadata {
            key: db_name,
            value,
            metadata: Metadata::with_version(version),
        });
    }

    Ok(DbUpdates {
        writes,
        deletes: tx.delete_dbs.clone(),
    })
}

/// Build the provenance record for a valid db-admin tx from its `_dbs`
/// delta, with old versions resolved from the world state.
pub(crate) fn construct_provenance_entries_for_db_admin_tx(
    world_state: &WorldState,
    tx: &DbAdministrationTx,
    entries: &DbUpdates,
) -> Result<TxDataForProvenance, EntryError> {
    let mut record = TxDataForProvenance {
        is_valid: true,
        db_name: DATABASES_DB_NAME.to_string(),
        user_id: tx.user_id.clone(),
        tx_id: tx.tx_id.clone(),
        writes: entries.writes.clone(),
        ..Default::default()
    };

    for kv in &entries.writes {
        if let Some(old_version) = world_state.get_version(DATABASES_DB_NAME, &kv.key)? {
            record
                .old_version_of_writes
                .insert(kv.key.clone(), old_version);
        }
    }
    for db_name in &entries.deletes {
        if let Some(old_version) = world_state.get_version(DATABASES_DB_NAME, db_name)? {
            record.deletes.insert(db_name.clone(), old_version);
        }
    }

    Ok(record)
}

/// The three per-database deltas a config tx produces.
pub(crate) struct ConfigTxEntries {
    /// Admin additions/removals against `_users`.
    pub(crate) admin_updates: DbUpdates,
    /// Node additions/removals against `_config`.
    pub(crate) node_updates: DbUpdates,
    /// The serialized configuration record at `_config/config`.
    pub(crate) config_updates: DbUpdates,
}

/// Diff the old configuration against the new one and serialize the new
/// config record.
pub(crate) fn construct_db_entries_for_config_tx(
    tx: &ConfigTx,
    old_config: &ClusterConfig,
    version: Version,
) -> Result<ConfigTxEntries, EntryError> {
    let admin_updates = crate::identity::construct_db_entries_for_cluster_admins(
        &old_config.admins,
        &tx.new_config.admins,
        version,
    )?;
    let node_updates = crate::identity::construct_db_entries_for_nodes(
        &old_config.nodes,
        &tx.new_config.nodes,
        version,
    )?;

    let serialized = sbor::basic_encode(&tx.new_config).map_err(|e| {
        EntryError::RecordSerialization {
            key: CONFIG_KEY.to_string(),
            detail: format!("{e:?}"),
        }
    })?;
    let config_updates = DbUpdates {
        writes: vec![KvWithMetadata {
            key: CONFIG_KEY.to_string(),
            value: serialized,
            metadata: Metadata::with_version(version),
        }],
        deletes: Vec::new(),
    };

    Ok(ConfigTxEntries {
        admin_updates,
        node_updates,
        config_updates,
    })
}

/// Build the three provenance records for a valid config tx: the config
/// record, the admin changes, and the node changes.
pub(crate) fn construct_provenance_entries_for_config_tx(
    world_state: &WorldState,
    tx: &ConfigTx,
    entries: &ConfigTxEntries,
) -> Result<Vec<TxDataForProvenance>, EntryError> {
    let mut config_record = TxDataForProvenance {
        is_valid: true,
        db_name: CONFIG_DB_NAME.to_string(),
        user_id: tx.user_id.clone(),
        tx_id: tx.tx_id.clone(),
        writes: entries.config_updates.writes.clone(),
        ..Default::default()
    };
    if let Some(old_version) = tx.read_old_config_version {
        config_record
            .old_version_of_writes
            .insert(CONFIG_KEY.to_string(), old_version);
    }

    let admins_record = crate::identity::construct_provenance_entries_for_cluster_admins(
        world_state,
        &tx.user_id,
        &tx.tx_id,
        &entries.admin_updates,
    )?;
    let nodes_record = crate::identity::construct_provenance_entries_for_nodes(
        world_state,
        &tx.user_id,
        &tx.tx_id,
        &entries.node_updates,
    )?;

    Ok(vec![config_record, admins_record, nodes_record])
}

/// Pair of deltas a block produces: the world-state delta fed to the trie
/// and the world state, and the provenance records.
pub(crate) struct BlockDeltas {
    pub(crate) world: WorldStateDelta,
    pub(crate) provenance: Vec<TxDataForProvenance>,
}

impl BlockDeltas {
    pub(crate) fn empty() -> Self {
        Self {
            world: WorldStateDelta::new(),
            provenance: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_types::{DataDelete, DataWrite, DbIndex, DbOperation, IndexAttributeType};

    fn tx_with_ops(ops: Vec<DbOperation>) -> DataTx {
        DataTx {
            must_sign_user_ids: vec!["alice".into()],
            tx_id: "tx1".into(),
            db_operations: ops,
        }
    }

    #[test]
    fn test_add_db_entries_advances_dirty_map() {
        let mut op = DbOperation::empty("db1");
        op.data_writes.push(DataWrite {
            key: "k1".into(),
            value: b"v1".to_vec(),
            acl: None,
        });
        let tx = tx_with_ops(vec![op]);

        let mut delta = WorldStateDelta::new();
        let mut dirty = DirtyWrites::new();
        add_db_entries_for_data_tx(&tx, Version::new(2, 3), &mut delta, &mut dirty);

        assert_eq!(
            dirty.get(&("db1".to_string(), "k1".to_string())),
            Some(&Version::new(2, 3))
        );
        assert_eq!(delta["db1"].writes.len(), 1);
        assert_eq!(delta["db1"].writes[0].metadata.version, Version::new(2, 3));
    }

    #[test]
    fn test_write_supersedes_pending_delete() {
        let mut delete = DbOperation::empty("db1");
        delete.data_deletes.push(DataDelete { key: "k1".into() });
        let mut write = DbOperation::empty("db1");
        write.data_writes.push(DataWrite {
            key: "k1".into(),
            value: b"v2".to_vec(),
            acl: None,
        });

        let mut delta = WorldStateDelta::new();
        let mut dirty = DirtyWrites::new();
        add_db_entries_for_data_tx(
            &tx_with_ops(vec![delete]),
            Version::new(2, 0),
            &mut delta,
            &mut dirty,
        );
        assert_eq!(delta["db1"].deletes, vec!["k1".to_string()]);

        add_db_entries_for_data_tx(
            &tx_with_ops(vec![write]),
            Version::new(2, 1),
            &mut delta,
            &mut dirty,
        );
        assert!(delta["db1"].deletes.is_empty());
        assert_eq!(delta["db1"].writes.len(), 1);
    }

    #[test]
    fn test_delete_keeps_earlier_write_in_delta() {
        // Write then delete of the same key: both stay, the delete wins at
        // apply time because writes land first.
        let mut write = DbOperation::empty("db1");
        write.data_writes.push(DataWrite {
            key: "k1".into(),
            value: b"v1".to_vec(),
            acl: None,
        });
        let mut delete = DbOperation::empty("db1");
        delete.data_deletes.push(DataDelete { key: "k1".into() });

        let mut delta = WorldStateDelta::new();
        let mut dirty = DirtyWrites::new();
        add_db_entries_for_data_tx(
            &tx_with_ops(vec![write]),
            Version::new(2, 0),
            &mut delta,
            &mut dirty,
        );
        add_db_entries_for_data_tx(
            &tx_with_ops(vec![delete]),
            Version::new(2, 1),
            &mut delta,
            &mut dirty,
        );

        assert_eq!(delta["db1"].writes.len(), 1);
        assert_eq!(delta["db1"].deletes, vec!["k1".to_string()]);
    }

    #[test]
    fn test_db_admin_entries_consume_index_for_created_dbs() {
        let mut dbs_index = std::collections::BTreeMap::new();
        dbs_index.insert(
            "db1".to_string(),
            Some(DbIndex {
                attribute_and_type: [("attr1".to_string(), IndexAttributeType::String)]
                    .into_iter()
                    .collect(),
            }),
        );
        dbs_index.insert("db2".to_string(), None);

        let tx = DbAdministrationTx {
            user_id: "admin".into(),
            tx_id: "tx-db".into(),
            create_dbs: vec!["db1".into()],
            delete_dbs: vec!["db9".into()],
            dbs_index,
        };

        let updates = construct_db_entries_for_db_admin_tx(&tx, Version::new(3, 0)).unwrap();

        // db1 was created with its schema; db2 was re-indexed to nothing.
        assert_eq!(updates.writes.len(), 2);
        assert_eq!(updates.writes[0].key, "db1");
        assert_eq!(updates.writes[0].value, br#"{"attr1":"STRING"}"#.to_vec());
        assert_eq!(updates.writes[1].key, "db2");
        assert!(updates.writes[1].value.is_empty());
        assert_eq!(updates.deletes, vec!["db9".to_string()]);
    }
}
