//! Versions, metadata, and access control for world-state entries.

use sbor::prelude::*;
use std::collections::BTreeSet;

/// Registry of user databases and their index schemas.
pub const DATABASES_DB_NAME: &str = "_dbs";

/// Database holding user records, including cluster admins.
pub const USERS_DB_NAME: &str = "_users";

/// Database holding the cluster configuration and per-node records.
pub const CONFIG_DB_NAME: &str = "_config";

/// Reserved key inside `_config` for the serialized cluster configuration.
pub const CONFIG_KEY: &str = "config";

/// The position of a transaction in the committed history.
///
/// Every write is stamped with the version of the transaction that produced
/// it. The derived ordering is lexicographic: block number first, then the
/// transaction's index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct Version {
    /// Block number, starting at 1.
    pub block_num: u64,
    /// Index of the transaction within its block.
    pub tx_num: u64,
}

impl Version {
    /// Create a version from a block number and a transaction index.
    pub fn new(block_num: u64, tx_num: u64) -> Self {
        Self { block_num, tx_num }
    }
}

/// Access control list attached to a world-state entry.
///
/// Sets compare by member identity; `BTreeSet` keeps the serialized form
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct AccessControl {
    /// Users allowed to read the entry.
    pub read_users: BTreeSet<String>,
    /// Users allowed to read and overwrite the entry.
    pub read_write_users: BTreeSet<String>,
}

/// Metadata stamped on every world-state entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Metadata {
    /// Version of the transaction that produced the entry.
    pub version: Version,
    /// Optional access control list.
    pub access_control: Option<AccessControl>,
}

impl Metadata {
    /// Metadata carrying only a version, no ACL.
    pub fn with_version(version: Version) -> Self {
        Self {
            version,
            access_control: None,
        }
    }
}

/// A keyed value together with its metadata, as stored in the world state and
/// mirrored into provenance records.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct KvWithMetadata {
    /// Entry key within its database.
    pub key: String,
    /// Entry value.
    pub value: Vec<u8>,
    /// Version and ACL.
    pub metadata: Metadata,
}

/// A key paired with the version it was read at.
///
/// The version is absent when the read observed a key that did not exist.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct KeyWithVersion {
    /// Key that was read.
    pub key: String,
    /// Version observed by the read, if the key existed.
    pub version: Option<Version>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering_is_lexicographic() {
        assert!(Version::new(1, 9) < Version::new(2, 0));
        assert!(Version::new(2, 0) < Version::new(2, 1));
        assert_eq!(Version::new(3, 4), Version::new(3, 4));
    }

    #[test]
    fn test_access_control_ignores_insertion_order() {
        let mut a = AccessControl::default();
        a.read_users.insert("alice".into());
        a.read_users.insert("bob".into());

        let mut b = AccessControl::default();
        b.read_users.insert("bob".into());
        b.read_users.insert("alice".into());

        assert_eq!(a, b);
        assert_eq!(
            sbor::basic_encode(&a).unwrap(),
            sbor::basic_encode(&b).unwrap()
        );
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut acl = AccessControl::default();
        acl.read_write_users.insert("writer".into());
        let meta = Metadata {
            version: Version::new(7, 2),
            access_control: Some(acl),
        };

        let encoded = sbor::basic_encode(&meta).unwrap();
        let decoded: Metadata = sbor::basic_decode(&encoded).unwrap();
        assert_eq!(meta, decoded);
        assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
    }
}
