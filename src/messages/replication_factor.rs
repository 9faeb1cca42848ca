//! Messages related to replication of keys.

use crate::ClientKey;

/// A message that captures the replication factors for an individual key.
///
/// Stored in the metadata key space as the value of a
/// [`MetadataKey::Replication`][crate::metadata::MetadataKey::Replication] key, wrapped in a
/// last-writer-wins lattice.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationFactor {
    /// The name of the key whose replication factor is being described.
    pub key: ClientKey,
    /// A set of mappings from individual tiers (MEMORY, DISK -- see
    /// [`Tier`][super::Tier]) to the cross-node replication factor at that tier.
    pub global: Vec<ReplicationValue>,
    /// A set of mappings from individual tiers to the intra-node replication
    /// factor at that tier.
    pub local: Vec<ReplicationValue>,
}

/// The replication level for a single key at a single tier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationValue {
    /// The tier represented by this message.
    pub tier: super::Tier,
    /// The replication level at this particular tier for this particular key.
    pub value: usize,
}

/// A message to propagate changes to a set of keys' replication factors.
#[derive(Default, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationFactorUpdate {
    /// The set of replication factor updates being sent.
    pub updates: Vec<ReplicationFactor>,
}
