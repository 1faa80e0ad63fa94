//! The four transaction payload kinds carried by blocks.

use crate::config::ClusterConfig;
use crate::identity::User;
use crate::state::{AccessControl, Version};
use sbor::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A read performed by a data transaction, as claimed by its submitter.
///
/// The committer copies reads verbatim into provenance; it does not
/// re-verify them (that is the validator's job).
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DataRead {
    /// Key that was read.
    pub key: String,
    /// Version observed, absent when the key did not exist.
    pub version: Option<Version>,
}

/// A write performed by a data transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DataWrite {
    /// Key to write.
    pub key: String,
    /// Value to store.
    pub value: Vec<u8>,
    /// ACL stamped into the entry's metadata.
    pub acl: Option<AccessControl>,
}

/// A delete performed by a data transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DataDelete {
    /// Key to delete.
    pub key: String,
}

/// All operations a data transaction performs against one database.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DbOperation {
    /// Target database.
    pub db_name: String,
    /// Claimed reads.
    pub data_reads: Vec<DataRead>,
    /// Writes, applied in order.
    pub data_writes: Vec<DataWrite>,
    /// Deletes.
    pub data_deletes: Vec<DataDelete>,
}

impl DbOperation {
    /// An operation set with no reads, writes, or deletes.
    pub fn empty(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            data_reads: Vec::new(),
            data_writes: Vec::new(),
            data_deletes: Vec::new(),
        }
    }
}

/// A data transaction touching one or more user databases.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DataTx {
    /// Users whose signatures the envelope must carry. The first entry is
    /// the submitter of record for provenance.
    pub must_sign_user_ids: Vec<String>,
    /// Unique transaction id.
    pub tx_id: String,
    /// Per-database operations.
    pub db_operations: Vec<DbOperation>,
}

/// A read of a user record claimed by a user-administration transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UserRead {
    /// Id of the user record that was read.
    pub user_id: String,
    /// Version observed, absent when the record did not exist.
    pub version: Option<Version>,
}

/// Creation or replacement of a user record.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UserWrite {
    /// The record to store, keyed by `user.id`.
    pub user: User,
    /// ACL stamped into the entry's metadata.
    pub acl: Option<AccessControl>,
}

/// Removal of a user record.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UserDelete {
    /// Id of the record to remove.
    pub user_id: String,
}

/// Administration of user records in `_users`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UserAdministrationTx {
    /// Submitting administrator.
    pub user_id: String,
    /// Unique transaction id.
    pub tx_id: String,
    /// Claimed reads of user records.
    pub user_reads: Vec<UserRead>,
    /// Records to create or replace.
    pub user_writes: Vec<UserWrite>,
    /// Records to remove.
    pub user_deletes: Vec<UserDelete>,
}

/// Type tag of an indexed attribute.
///
/// Serializes to JSON as `"BOOLEAN"`, `"NUMBER"`, or `"STRING"` inside the
/// `_dbs` registry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexAttributeType {
    /// Boolean-valued attribute.
    Boolean,
    /// Numeric attribute.
    Number,
    /// String attribute.
    String,
}

/// An index schema: attribute name to attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct DbIndex {
    /// Attribute name → type tag.
    pub attribute_and_type: BTreeMap<String, IndexAttributeType>,
}

/// Administration of the database registry `_dbs`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DbAdministrationTx {
    /// Submitting administrator.
    pub user_id: String,
    /// Unique transaction id.
    pub tx_id: String,
    /// Databases to create.
    pub create_dbs: Vec<String>,
    /// Databases to remove from the registry.
    pub delete_dbs: Vec<String>,
    /// Index schemas, keyed by database name. Entries naming a database in
    /// `create_dbs` are consumed by the creation; the rest re-index existing
    /// databases. A `None` schema clears the index.
    pub dbs_index: BTreeMap<String, Option<DbIndex>>,
}

/// Replacement of the cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConfigTx {
    /// Submitting administrator.
    pub user_id: String,
    /// Unique transaction id.
    pub tx_id: String,
    /// Version of the configuration the submitter read before proposing the
    /// new one. Unset only in the first configuration block.
    pub read_old_config_version: Option<Version>,
    /// The configuration to install.
    pub new_config: ClusterConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_attribute_type_json_tags() {
        assert_eq!(
            serde_json::to_string(&IndexAttributeType::Boolean).unwrap(),
            "\"BOOLEAN\""
        );
        assert_eq!(
            serde_json::to_string(&IndexAttributeType::Number).unwrap(),
            "\"NUMBER\""
        );
        assert_eq!(
            serde_json::to_string(&IndexAttributeType::String).unwrap(),
            "\"STRING\""
        );
    }

    #[test]
    fn test_data_tx_roundtrip() {
        let tx = DataTx {
            must_sign_user_ids: vec!["alice".into()],
            tx_id: "tx1".into(),
            db_operations: vec![DbOperation {
                db_name: "db1".into(),
                data_reads: vec![DataRead {
                    key: "k0".into(),
                    version: Some(Version::new(1, 0)),
                }],
                data_writes: vec![DataWrite {
                    key: "k1".into(),
                    value: b"v1".to_vec(),
                    acl: None,
                }],
                data_deletes: vec![DataDelete { key: "k2".into() }],
            }],
        };

        let encoded = sbor::basic_encode(&tx).unwrap();
        let decoded: DataTx = sbor::basic_decode(&encoded).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
    }

    #[test]
    fn test_db_administration_tx_roundtrip() {
        let mut dbs_index = BTreeMap::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("attr1".to_string(), IndexAttributeType::Boolean);
        dbs_index.insert(
            "db3".to_string(),
            Some(DbIndex {
                attribute_and_type: attrs,
            }),
        );
        dbs_index.insert("db2".to_string(), None);

        let tx = DbAdministrationTx {
            user_id: "admin".into(),
            tx_id: "tx-db".into(),
            create_dbs: vec!["db3".into()],
            delete_dbs: vec!["db9".into()],
            dbs_index,
        };

        let encoded = sbor::basic_encode(&tx).unwrap();
        let decoded: DbAdministrationTx = sbor::basic_decode(&encoded).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
    }
}
