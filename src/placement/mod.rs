//! Key placement: which threads of which nodes are responsible for a key.
//!
//! Hash-ring policy is an external collaborator of the storage node. The node
//! only depends on the [`PlacementOracle`] trait; the consistent-hash-ring
//! implementation in [`ring`] is the production adapter behind it, and tests
//! inject fixed mocks instead.

use crate::{
    messages::Tier,
    metadata::MetadataKey,
    topics::StorageThread,
    ClientKey, Key,
};
use eyre::anyhow;
use std::collections::HashMap;

pub mod ring;

pub use ring::RingPlacement;

/// The fixed replication factor used for metadata keys.
pub const METADATA_REPLICATION_FACTOR: usize = 1;

/// Resolves keys to the ordered list of threads responsible for them, and
/// tracks cluster membership.
///
/// Placement of a client key depends on the key's cached replication factors:
/// [`responsible_threads`][Self::responsible_threads] returns `None` when no
/// replication entry exists for the key, in which case the caller must issue a
/// replication-factor fetch and defer the work. Metadata keys always use the
/// fixed [`METADATA_REPLICATION_FACTOR`] and can never fail to resolve.
pub trait PlacementOracle {
    /// Returns all threads responsible for the given key across the given tiers.
    ///
    /// Returns `None` if `key` is a client key without an entry in the given
    /// replication map.
    fn responsible_threads(
        &self,
        key: &Key,
        key_replication_map: &HashMap<ClientKey, KeyReplication>,
        tiers: &[Tier],
    ) -> eyre::Result<Option<Vec<StorageThread>>>;

    /// Returns the threads responsible for the given metadata key.
    fn responsible_threads_metadata(
        &self,
        key: &MetadataKey,
    ) -> eyre::Result<Vec<StorageThread>>;

    /// Adds a node to the given tier.
    ///
    /// Returns `true` if the node was not part of the tier before, or if it is
    /// rejoining with a larger `join_count`.
    fn join_node(&mut self, tier: Tier, node_id: &str, join_count: u32) -> bool;

    /// Removes a node from the given tier.
    fn depart_node(&mut self, tier: Tier, node_id: &str);

    /// Adds a worker thread to the given tier.
    fn join_thread(&mut self, tier: Tier, thread_id: u32);

    /// Returns the IDs of all nodes that are members of the given tier.
    fn member_nodes(&self, tier: Tier) -> Vec<String>;

    /// Returns the single thread that is considered the primary location of
    /// the given key in the given tier.
    ///
    /// Returns `None` if the tier has no members.
    fn primary_thread(&self, tier: Tier, key: &Key) -> Option<StorageThread>;
}

/// Keeps track of the global and local replication factors of one key, per tier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyReplication {
    /// Cross-node replication, i.e. the number of nodes per tier that the key
    /// should be stored on.
    pub global_replication: HashMap<Tier, usize>,
    /// Intra-node replication, i.e. the number of threads per node that the
    /// key should be stored on.
    pub local_replication: HashMap<Tier, usize>,
}

impl KeyReplication {
    /// Utility constructor for a key replication with memory and disk tier factors.
    pub fn create_new(
        global_memory: usize,
        global_disk: usize,
        local_memory: usize,
        local_disk: usize,
    ) -> Self {
        Self {
            global_replication: [(Tier::Memory, global_memory), (Tier::Disk, global_disk)]
                .iter()
                .copied()
                .collect(),
            local_replication: [(Tier::Memory, local_memory), (Tier::Disk, local_disk)]
                .iter()
                .copied()
                .collect(),
        }
    }
}

/// Converts the given [`Tier`] to an uppercase string, e.g. `MEMORY`.
pub fn tier_name(tier: Tier) -> &'static str {
    match tier {
        Tier::Memory => "MEMORY",
        Tier::Disk => "DISK",
        Tier::Routing => "ROUTING",
    }
}

/// Parses a tier name that was previously returned from [`tier_name`].
///
/// The given string must match the output of `tier_name` exactly.
pub fn parse_tier_name(s: &str) -> eyre::Result<Tier> {
    match s {
        "MEMORY" => Ok(Tier::Memory),
        "DISK" => Ok(Tier::Disk),
        "ROUTING" => Ok(Tier::Routing),
        other => Err(anyhow!("failed to parse tier name `{}`", other)),
    }
}

/// A placement oracle that always returns the same fixed list of threads.
///
/// Client keys still require a replication entry, mirroring the contract of
/// the production implementation.
#[cfg(test)]
pub struct FixedPlacement {
    /// The threads that every key resolves to.
    pub threads: Vec<StorageThread>,
}

#[cfg(test)]
impl PlacementOracle for FixedPlacement {
    fn responsible_threads(
        &self,
        key: &Key,
        key_replication_map: &HashMap<ClientKey, KeyReplication>,
        _tiers: &[Tier],
    ) -> eyre::Result<Option<Vec<StorageThread>>> {
        match key {
            Key::Metadata(_) => Ok(Some(self.threads.clone())),
            Key::Client(key) => {
                if key_replication_map.contains_key(key) {
                    Ok(Some(self.threads.clone()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn responsible_threads_metadata(
        &self,
        _key: &MetadataKey,
    ) -> eyre::Result<Vec<StorageThread>> {
        Ok(self.threads.clone())
    }

    fn join_node(&mut self, _tier: Tier, _node_id: &str, _join_count: u32) -> bool {
        false
    }

    fn depart_node(&mut self, _tier: Tier, _node_id: &str) {}

    fn join_thread(&mut self, _tier: Tier, _thread_id: u32) {}

    fn member_nodes(&self, _tier: Tier) -> Vec<String> {
        let mut nodes: Vec<String> = self.threads.iter().map(|t| t.node_id.clone()).collect();
        nodes.dedup();
        nodes
    }

    fn primary_thread(&self, _tier: Tier, _key: &Key) -> Option<StorageThread> {
        self.threads.first().cloned()
    }
}
