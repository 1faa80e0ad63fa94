//! Cluster configuration records stored in the `_config` database.

use sbor::prelude::*;

/// A cluster node's connection record.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct NodeConfig {
    /// Unique node id; also the record's key in `_config`.
    pub id: String,
    /// Host the node listens on.
    pub address: String,
    /// Port the node listens on.
    pub port: u32,
    /// DER-encoded certificate the node signs blocks with.
    pub certificate: Vec<u8>,
}

/// A cluster administrator as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Admin {
    /// Unique admin id.
    pub id: String,
    /// DER-encoded certificate.
    pub certificate: Vec<u8>,
}

/// Certificate-authority material trusted by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct CaConfig {
    /// Root CA certificates.
    pub roots: Vec<Vec<u8>>,
    /// Intermediate CA certificates.
    pub intermediates: Vec<Vec<u8>>,
}

/// The whole cluster configuration, stored serialized under `_config/config`.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ClusterConfig {
    /// All cluster nodes.
    pub nodes: Vec<NodeConfig>,
    /// All cluster administrators.
    pub admins: Vec<Admin>,
    /// Trusted CA material.
    pub cert_auth_config: Option<CaConfig>,
}
