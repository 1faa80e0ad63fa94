//! Blocks, headers, validation verdicts, and payload envelopes.

use crate::hash::Hash;
use crate::transactions::{ConfigTx, DataTx, DbAdministrationTx, UserAdministrationTx};
use sbor::prelude::*;
use std::collections::BTreeMap;

/// Per-transaction validation verdict assigned by the upstream validator.
///
/// The committer only distinguishes [`Flag::Valid`] from everything else:
/// any other flag means the transaction does not mutate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum Flag {
    /// The transaction mutates state.
    Valid,
    /// A read version conflicts with a prior write in the same block.
    InvalidMvccConflictWithinBlock,
    /// A read version conflicts with the committed state.
    InvalidMvccConflictWithCommittedState,
    /// The transaction targets a database that does not exist.
    InvalidDatabaseDoesNotExist,
    /// The submitter lacks permission on a touched entry.
    InvalidNoPermission,
    /// The transaction's entries are malformed.
    InvalidIncorrectEntries,
    /// A required signature is missing from the envelope.
    InvalidMissingSignature,
    /// The transaction id was already committed.
    InvalidDuplicateTxId,
    /// The submitter is not authorized for this transaction kind.
    InvalidUnauthorized,
}

impl Flag {
    /// Whether this verdict allows state mutation.
    pub fn is_valid(self) -> bool {
        matches!(self, Flag::Valid)
    }
}

/// Validation outcome for one transaction of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct ValidationInfo {
    /// The verdict.
    pub flag: Flag,
}

impl ValidationInfo {
    /// A `VALID` verdict.
    pub const VALID: Self = Self { flag: Flag::Valid };
}

/// Block header: position in the chain, verdicts, and the state-trie root.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockHeader {
    /// Block number; the first committed block is 1.
    pub number: u64,
    /// One verdict per transaction, in transaction order.
    pub validation_info: Vec<ValidationInfo>,
    /// Root of the state trie after applying this block's valid
    /// transactions. Stamped by the committer before the block is persisted.
    pub state_root: Hash,
}

/// A data transaction with its signatures, keyed by signer id.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DataTxEnvelope {
    /// The transaction.
    pub payload: DataTx,
    /// Signer id → signature over the encoded payload. Opaque to the
    /// committer; carried for round-tripping.
    pub signatures: BTreeMap<String, Vec<u8>>,
}

/// A user-administration transaction with its signature.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UserAdministrationTxEnvelope {
    /// The transaction.
    pub payload: UserAdministrationTx,
    /// Submitter signature over the encoded payload.
    pub signature: Vec<u8>,
}

/// A db-administration transaction with its signature.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DbAdministrationTxEnvelope {
    /// The transaction.
    pub payload: DbAdministrationTx,
    /// Submitter signature over the encoded payload.
    pub signature: Vec<u8>,
}

/// A config transaction with its signature.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConfigTxEnvelope {
    /// The transaction.
    pub payload: ConfigTx,
    /// Submitter signature over the encoded payload.
    pub signature: Vec<u8>,
}

/// Block payload: exactly one of the four transaction-envelope kinds.
///
/// A closed sum: the committer matches exhaustively and no open extension
/// is anticipated.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Payload {
    /// An ordered batch of data transactions.
    DataTxs(Vec<DataTxEnvelope>),
    /// A single user-administration transaction.
    UserAdministrationTx(UserAdministrationTxEnvelope),
    /// A single db-administration transaction.
    DbAdministrationTx(DbAdministrationTxEnvelope),
    /// A single config transaction.
    ConfigTx(ConfigTxEnvelope),
}

/// A block: header plus one payload.
///
/// Created upstream, mutated exactly once (the committer stamps
/// `header.state_root`), then frozen in the block store.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// The header.
    pub header: BlockHeader,
    /// The payload.
    pub payload: Payload,
}

impl Block {
    /// Block number shorthand.
    pub fn number(&self) -> u64 {
        self.header.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactions::{DataWrite, DbOperation};

    fn sample_data_block(number: u64) -> Block {
        let mut op = DbOperation::empty("db1");
        op.data_writes.push(DataWrite {
            key: "key1".into(),
            value: b"value-1".to_vec(),
            acl: None,
        });

        Block {
            header: BlockHeader {
                number,
                validation_info: vec![ValidationInfo::VALID],
                state_root: Hash::ZERO,
            },
            payload: Payload::DataTxs(vec![DataTxEnvelope {
                payload: DataTx {
                    must_sign_user_ids: vec!["alice".into()],
                    tx_id: "tx1".into(),
                    db_operations: vec![op],
                },
                signatures: BTreeMap::new(),
            }]),
        }
    }

    #[test]
    fn test_flag_validity() {
        assert!(Flag::Valid.is_valid());
        assert!(!Flag::InvalidMvccConflictWithinBlock.is_valid());
        assert!(!Flag::InvalidNoPermission.is_valid());
        assert!(!Flag::InvalidIncorrectEntries.is_valid());
    }

    #[test]
    fn test_block_roundtrip_is_byte_identical() {
        let block = sample_data_block(3);
        let encoded = sbor::basic_encode(&block).unwrap();
        let decoded: Block = sbor::basic_decode(&encoded).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
    }

    #[test]
    fn test_all_payload_kinds_roundtrip() {
        use crate::config::ClusterConfig;
        use crate::transactions::{ConfigTx, DbAdministrationTx, UserAdministrationTx};

        let payloads = vec![
            Payload::UserAdministrationTx(UserAdministrationTxEnvelope {
                payload: UserAdministrationTx {
                    user_id: "admin".into(),
                    tx_id: "tx-user".into(),
                    user_reads: vec![],
                    user_writes: vec![],
                    user_deletes: vec![],
                },
                signature: b"sig".to_vec(),
            }),
            Payload::DbAdministrationTx(DbAdministrationTxEnvelope {
                payload: DbAdministrationTx {
                    user_id: "admin".into(),
                    tx_id: "tx-db".into(),
                    create_dbs: vec!["db1".into()],
                    delete_dbs: vec![],
                    dbs_index: Default::default(),
                },
                signature: b"sig".to_vec(),
            }),
            Payload::ConfigTx(ConfigTxEnvelope {
                payload: ConfigTx {
                    user_id: "admin".into(),
                    tx_id: "tx-config".into(),
                    read_old_config_version: None,
                    new_config: ClusterConfig::default(),
                },
                signature: b"sig".to_vec(),
            }),
        ];

        for payload in payloads {
            let block = Block {
                header: BlockHeader {
                    number: 1,
                    validation_info: vec![ValidationInfo::VALID],
                    state_root: Hash::ZERO,
                },
                payload,
            };
            let encoded = sbor::basic_encode(&block).unwrap();
            let decoded: Block = sbor::basic_decode(&encoded).unwrap();
            assert_eq!(block, decoded);
            assert_eq!(encoded, sbor::basic_encode(&decoded).unwrap());
        }
    }
}
