//! Core data model for the Vellum ledger.
//!
//! Everything that crosses a store boundary lives here: blocks and their four
//! payload kinds, versions and metadata, identity records, and the cluster
//! configuration. All persisted types derive `BasicSbor`; container fields use
//! `BTreeMap`/`BTreeSet`/`Vec` only, so that a decoded value re-encodes to the
//! exact bytes it came from. Replicas compare state roots, so any
//! non-determinism in encoding would fork the fleet.

#![warn(missing_docs)]

mod block;
mod config;
mod hash;
mod identity;
mod state;
mod transactions;

pub use block::{
    Block, BlockHeader, ConfigTxEnvelope, DataTxEnvelope, DbAdministrationTxEnvelope, Flag,
    Payload, UserAdministrationTxEnvelope, ValidationInfo,
};
pub use config::{Admin, CaConfig, ClusterConfig, NodeConfig};
pub use hash::Hash;
pub use identity::{DbPermission, Privilege, User};
pub use state::{
    AccessControl, KeyWithVersion, KvWithMetadata, Metadata, Version, CONFIG_DB_NAME, CONFIG_KEY,
    DATABASES_DB_NAME, USERS_DB_NAME,
};
pub use transactions::{
    ConfigTx, DataDelete, DataRead, DataTx, DataWrite, DbAdministrationTx, DbIndex, DbOperation,
    IndexAttributeType, UserAdministrationTx, UserDelete, UserRead, UserWrite,
};
