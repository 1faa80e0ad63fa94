//! Identity entry construction: user-admin transactions and the admin/node
//! diffs a config transaction implies.

use crate::errors::EntryError;
use sbor::prelude::*;
use std::collections::BTreeMap;
use vellum_storage::{DbUpdates, TxDataForProvenance, WorldState};
use vellum_types::{
    Admin, KeyWithVersion, KvWithMetadata, Metadata, NodeConfig, User, UserAdministrationTx,
    Version, CONFIG_DB_NAME, USERS_DB_NAME,
};

fn encode_record<T: BasicEncode>(key: &str, record: &T) -> Result<Vec<u8>, EntryError> {
    sbor::basic_encode(record).map_err(|e| EntryError::RecordSerialization {
        key: key.to_string(),
        detail: format!("{e:?}"),
    })
}

/// Build the `_users` delta for a valid user-admin tx.
pub(crate) fn construct_db_entries_for_user_admin_tx(
    tx: &UserAdministrationTx,
    version: Version,
) -> Result<DbUpdates, EntryError> {
    let mut updates = DbUpdates::default();

    for write in &tx.user_writes {
        updates.writes.push(KvWithMetadata {
            key: write.user.id.clone(),
            value: encode_record(&write.user.id, &write.user)?,
            metadata: Metadata {
                version,
                access_control: write.acl.clone(),
            },
        });
    }
    for delete in &tx.user_deletes {
        updates.deletes.push(delete.user_id.clone());
    }

    Ok(updates)
}

/// Build the provenance record for a valid user-admin tx. Old versions come
/// from the world state directly: these blocks carry a single tx, so no
/// dirty-write map is involved.
pub(crate) fn construct_provenance_entries_for_user_admin_tx(
    world_state: &WorldState,
    tx: &UserAdministrationTx,
    version: Version,
) -> Result<TxDataForProvenance, EntryError> {
    let mut record = TxDataForProvenance {
        is_valid: true,
        db_name: USERS_DB_NAME.to_string(),
        user_id: tx.user_id.clone(),
        tx_id: tx.tx_id.clone(),
        ..Default::default()
    };

    for read in &tx.user_reads {
        record.reads.push(KeyWithVersion {
            key: read.user_id.clone(),
            version: read.version,
        });
    }

    for write in &tx.user_writes {
        record.writes.push(KvWithMetadata {
            key: write.user.id.clone(),
            value: encode_record(&write.user.id, &write.user)?,
            metadata: Metadata {
                version,
                access_control: write.acl.clone(),
            },
        });
        if let Some(old_version) = world_state.get_version(USERS_DB_NAME, &write.user.id)? {
            record
                .old_version_of_writes
                .insert(write.user.id.clone(), old_version);
        }
    }

    for delete in &tx.user_deletes {
        if let Some(old_version) = world_state.get_version(USERS_DB_NAME, &delete.user_id)? {
            record.deletes.insert(delete.user_id.clone(), old_version);
        }
    }

    Ok(record)
}

/// Diff old vs new cluster admins into a `_users` delta.
///
/// Added admins become admin-privileged user records, removed admins become
/// deletes, and a changed certificate rewrites the record. Unchanged admins
/// produce nothing, so their stored versions stay put.
pub(crate) fn construct_db_entries_for_cluster_admins(
    old_admins: &[Admin],
    new_admins: &[Admin],
    version: Version,
) -> Result<DbUpdates, EntryError> {
    let old_by_id: BTreeMap<&str, &Admin> =
        old_admins.iter().map(|a| (a.id.as_str(), a)).collect();
    let new_by_id: BTreeMap<&str, &Admin> =
        new_admins.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut updates = DbUpdates::default();

    for (id, admin) in &new_by_id {
        let unchanged = old_by_id
            .get(id)
            .is_some_and(|old| old.certificate == admin.certificate);
        if unchanged {
            continue;
        }
        let user = User::admin(admin.id.clone(), admin.certificate.clone());
        updates.writes.push(KvWithMetadata {
            key: admin.id.clone(),
            value: encode_record(&admin.id, &user)?,
            metadata: Metadata::with_version(version),
        });
    }

    for id in old_by_id.keys() {
        if !new_by_id.contains_key(id) {
            updates.deletes.push((*id).to_string());
        }
    }

    Ok(updates)
}

/// Diff old vs new cluster nodes into a `_config` delta, keyed by node id.
pub(crate) fn construct_db_entries_for_nodes(
    old_nodes: &[NodeConfig],
    new_nodes: &[NodeConfig],
    version: Version,
) -> Result<DbUpdates, EntryError> {
    let old_by_id: BTreeMap<&str, &NodeConfig> =
        old_nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let new_by_id: BTreeMap<&str, &NodeConfig> =
        new_nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut updates = DbUpdates::default();

    for (id, node) in &new_by_id {
        let unchanged = old_by_id.get(id).is_some_and(|old| *old == *node);
        if unchanged {
            continue;
        }
        updates.writes.push(KvWithMetadata {
            key: node.id.clone(),
            value: encode_record(&node.id, *node)?,
            metadata: Metadata::with_version(version),
        });
    }

    for id in old_by_id.keys() {
        if !new_by_id.contains_key(id) {
            updates.deletes.push((*id).to_string());
        }
    }

    Ok(updates)
}

/// Provenance record for the admin changes of a config tx.
pub(crate) fn construct_provenance_entries_for_cluster_admins(
    world_state: &WorldState,
    user_id: &str,
    tx_id: &str,
    updates: &DbUpdates,
) -> Result<TxDataForProvenance, EntryError> {
    provenance_for_identity_updates(world_state, USERS_DB_NAME, user_id, tx_id, updates)
}

/// Provenance record for the node changes of a config tx.
pub(crate) fn construct_provenance_entries_for_nodes(
    world_state: &WorldState,
    user_id: &str,
    tx_id: &str,
    updates: &DbUpdates,
) -> Result<TxDataForProvenance, EntryError> {
    provenance_for_identity_updates(world_state, CONFIG_DB_NAME, user_id, tx_id, updates)
}

fn provenance_for_identity_updates(
    world_state: &WorldState,
    db_name: &str,
    user_id: &str,
    tx_id: &str,
    updates: &DbUpdates,
) -> Result<TxDataForProvenance, EntryError> {
    let mut record = TxDataForProvenance {
        is_valid: true,
        db_name: db_name.to_string(),
        user_id: user_id.to_string(),
        tx_id: tx_id.to_string(),
        writes: updates.writes.clone(),
        ..Default::default()
    };

    for kv in &updates.writes {
        if let Some(old_version) = world_state.get_version(db_name, &kv.key)? {
            record
                .old_version_of_writes
                .insert(kv.key.clone(), old_version);
        }
    }
    for key in &updates.deletes {
        if let Some(old_version) = world_state.get_version(db_name, key)? {
            record.deletes.insert(key.clone(), old_version);
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(id: &str, cert: &[u8]) -> Admin {
        Admin {
            id: id.into(),
            certificate: cert.to_vec(),
        }
    }

    fn node(id: &str, port: u32) -> NodeConfig {
        NodeConfig {
            id: id.into(),
            address: "127.0.0.1".into(),
            port,
            certificate: b"node-cert".to_vec(),
        }
    }

    #[test]
    fn test_admin_diff_adds_removes_and_rewrites() {
        let old = vec![admin("A1", b"c1"), admin("A2", b"c2"), admin("A3", b"c3")];
        let new = vec![admin("A2", b"c2"), admin("A3", b"c3-new"), admin("A4", b"c4")];

        let updates =
            construct_db_entries_for_cluster_admins(&old, &new, Version::new(2, 0)).unwrap();

        let written: Vec<&str> = updates.writes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(written, vec!["A3", "A4"]);
        assert_eq!(updates.deletes, vec!["A1".to_string()]);

        let a3: User = sbor::basic_decode(&updates.writes[0].value).unwrap();
        assert_eq!(a3.certificate, b"c3-new");
        assert!(a3.privilege.unwrap().admin);
    }

    #[test]
    fn test_admin_diff_of_identical_sets_is_empty() {
        let admins = vec![admin("A1", b"c1"), admin("A2", b"c2")];
        let updates =
            construct_db_entries_for_cluster_admins(&admins, &admins, Version::new(2, 0)).unwrap();
        assert!(updates.writes.is_empty());
        assert!(updates.deletes.is_empty());
    }

    #[test]
    fn test_node_diff_detects_any_field_change() {
        let old = vec![node("N1", 6001), node("N2", 6002)];
        let new = vec![node("N1", 6001), node("N2", 7002), node("N3", 6003)];

        let updates = construct_db_entries_for_nodes(&old, &new, Version::new(2, 0)).unwrap();
        let written: Vec<&str> = updates.writes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(written, vec!["N2", "N3"]);
        assert!(updates.deletes.is_empty());
    }

    #[test]
    fn test_user_admin_entries() {
        let tx = UserAdministrationTx {
            user_id: "admin".into(),
            tx_id: "tx1".into(),
            user_reads: vec![],
            user_writes: vec![vellum_types::UserWrite {
                user: User {
                    id: "alice".into(),
                    certificate: b"cert".to_vec(),
                    privilege: None,
                },
                acl: None,
            }],
            user_deletes: vec![vellum_types::UserDelete {
                user_id: "bob".into(),
            }],
        };

        let updates = construct_db_entries_for_user_admin_tx(&tx, Version::new(3, 0)).unwrap();
        assert_eq!(updates.writes.len(), 1);
        assert_eq!(updates.writes[0].key, "alice");
        assert_eq!(updates.writes[0].metadata.version, Version::new(3, 0));
        assert_eq!(updates.deletes, vec!["bob".to_string()]);

        let alice: User = sbor::basic_decode(&updates.writes[0].value).unwrap();
        assert_eq!(alice.id, "alice");
    }
}
