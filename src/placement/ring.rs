//! Consistent-hash-ring implementation of the [`PlacementOracle`].
//!
//! Each tier has a global ring that places keys on nodes and a local ring
//! that places keys on the worker threads within a node. The responsible
//! threads for a key are the cartesian product of the two.

use super::{KeyReplication, PlacementOracle, METADATA_REPLICATION_FACTOR};
use crate::{
    messages::Tier, metadata::MetadataKey, topics::StorageThread, ClientKey, Key,
};
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap, HashSet},
    hash::{Hash, Hasher},
};

/// The number of virtual entries created per node/thread in the rings.
///
/// The virtual entries are spread uniformly across the ring using consistent
/// hashing, so keys are spread uniformly across nodes and threads even if the
/// key hashes are not.
const VIRTUAL_ENTRY_NUM: u32 = 3000;

/// Placement oracle backed by per-tier consistent hash rings.
pub struct RingPlacement {
    default_local_replication: usize,
    global_rings: HashMap<Tier, GlobalRing>,
    local_rings: HashMap<Tier, LocalRing>,
}

impl RingPlacement {
    /// Creates an empty placement with the given local replication default.
    ///
    /// The local replication default is used for metadata keys, which do not
    /// carry per-key replication factors.
    pub fn new(default_local_replication: usize) -> Self {
        Self {
            default_local_replication,
            global_rings: Default::default(),
            local_rings: Default::default(),
        }
    }

    fn responsible_threads_in_tier(
        &self,
        key: &Key,
        tier: Tier,
        global_replication: usize,
        local_replication: usize,
    ) -> Vec<StorageThread> {
        let empty_global = GlobalRing::default();
        let empty_local = LocalRing::default();
        let global_ring = self.global_rings.get(&tier).unwrap_or(&empty_global);
        let local_ring = self.local_rings.get(&tier).unwrap_or(&empty_local);

        let nodes = global_ring.responsible_nodes(key, global_replication);
        let thread_ids = local_ring.responsible_threads(key, local_replication);

        let mut result = Vec::new();
        for node_id in nodes {
            for &thread_id in &thread_ids {
                result.push(StorageThread::new(node_id.to_owned(), thread_id));
            }
        }
        result
    }
}

impl PlacementOracle for RingPlacement {
    fn responsible_threads(
        &self,
        key: &Key,
        key_replication_map: &HashMap<ClientKey, KeyReplication>,
        tiers: &[Tier],
    ) -> eyre::Result<Option<Vec<StorageThread>>> {
        match key {
            Key::Metadata(metadata_key) => {
                self.responsible_threads_metadata(metadata_key).map(Some)
            }
            Key::Client(client_key) => {
                let replication = match key_replication_map.get(client_key) {
                    Some(replication) => replication,
                    None => return Ok(None),
                };

                let mut result = Vec::new();
                for &tier in tiers {
                    let global = replication
                        .global_replication
                        .get(&tier)
                        .copied()
                        .unwrap_or_default();
                    let local = replication
                        .local_replication
                        .get(&tier)
                        .copied()
                        .unwrap_or_default();
                    result.extend(self.responsible_threads_in_tier(key, tier, global, local));
                }
                Ok(Some(result))
            }
        }
    }

    fn responsible_threads_metadata(
        &self,
        key: &MetadataKey,
    ) -> eyre::Result<Vec<StorageThread>> {
        // metadata always lives in the memory tier with a fixed replication factor
        Ok(self.responsible_threads_in_tier(
            &key.clone().into(),
            Tier::Memory,
            METADATA_REPLICATION_FACTOR,
            self.default_local_replication,
        ))
    }

    fn join_node(&mut self, tier: Tier, node_id: &str, join_count: u32) -> bool {
        self.global_rings
            .entry(tier)
            .or_default()
            .insert_node(node_id, join_count)
    }

    fn depart_node(&mut self, tier: Tier, node_id: &str) {
        if let Some(ring) = self.global_rings.get_mut(&tier) {
            ring.remove_node(node_id);
        }
    }

    fn join_thread(&mut self, tier: Tier, thread_id: u32) {
        self.local_rings
            .entry(tier)
            .or_default()
            .insert_thread(thread_id);
    }

    fn member_nodes(&self, tier: Tier) -> Vec<String> {
        self.global_rings
            .get(&tier)
            .map(|ring| ring.unique_nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn primary_thread(&self, tier: Tier, key: &Key) -> Option<StorageThread> {
        let node_id = self.global_rings.get(&tier)?.find(key)?.to_owned();
        let thread_id = self.local_rings.get(&tier)?.find(key)?;
        Some(StorageThread::new(node_id, thread_id))
    }
}

/// Places keys on nodes within one tier.
#[derive(Default)]
struct GlobalRing {
    ring: ConsistentHashRing<VirtualNode>,
    unique_nodes: HashSet<String>,
    node_join_count: HashMap<String, u32>,
}

impl GlobalRing {
    /// Inserts the given node into the ring.
    ///
    /// Returns `true` if the node was not present in the ring before, or if the
    /// `join_count` of the previous entry is lower than the new `join_count`.
    fn insert_node(&mut self, node_id: &str, join_count: u32) -> bool {
        if self.unique_nodes.contains(node_id) {
            // if we already have the node, only report a change if it's rejoining
            let entry = self.node_join_count.entry(node_id.to_owned()).or_default();
            if *entry < join_count {
                *entry = join_count;
                true
            } else {
                false
            }
        } else {
            self.unique_nodes.insert(node_id.to_owned());
            self.node_join_count.insert(node_id.to_owned(), join_count);

            for virtual_id in 0..VIRTUAL_ENTRY_NUM {
                self.ring.insert(VirtualNode {
                    node_id: node_id.to_owned(),
                    virtual_id,
                });
            }
            true
        }
    }

    fn remove_node(&mut self, node_id: &str) {
        for virtual_id in 0..VIRTUAL_ENTRY_NUM {
            self.ring.remove(&VirtualNode {
                node_id: node_id.to_owned(),
                virtual_id,
            });
        }
        self.unique_nodes.remove(node_id);
        self.node_join_count.remove(node_id);
    }

    /// Returns the set of nodes responsible for the given key.
    fn responsible_nodes(&self, key: &Key, global_replication: usize) -> HashSet<&str> {
        let mut nodes = HashSet::new();
        for entry in self.ring.entries_starting_at(key) {
            let new = nodes.insert(entry.node_id.as_str());
            if new && nodes.len() >= global_replication {
                break;
            }
        }
        nodes
    }

    /// Finds the first node responsible for the given key, if any.
    fn find(&self, key: &Key) -> Option<&str> {
        self.ring
            .entries_starting_at(key)
            .next()
            .map(|entry| entry.node_id.as_str())
    }
}

/// Places keys on the worker threads within a node.
#[derive(Default)]
struct LocalRing {
    ring: ConsistentHashRing<VirtualThread>,
}

impl LocalRing {
    fn insert_thread(&mut self, thread_id: u32) {
        for virtual_id in 0..VIRTUAL_ENTRY_NUM {
            self.ring.insert(VirtualThread {
                thread_id,
                virtual_id,
            });
        }
    }

    fn responsible_threads(&self, key: &Key, local_replication: usize) -> HashSet<u32> {
        let mut thread_ids = HashSet::new();
        for entry in self.ring.entries_starting_at(key) {
            thread_ids.insert(entry.thread_id);
            if thread_ids.len() >= local_replication {
                break;
            }
        }
        thread_ids
    }

    fn find(&self, key: &Key) -> Option<u32> {
        self.ring
            .entries_starting_at(key)
            .next()
            .map(|entry| entry.thread_id)
    }
}

/// A hash ring ordered by the hashes of its entries.
struct ConsistentHashRing<T> {
    entries: BTreeMap<u64, T>,
}

impl<T: Hash> ConsistentHashRing<T> {
    fn insert(&mut self, entry: T) {
        self.entries.insert(hash(&entry), entry);
    }

    fn remove(&mut self, entry: &T) {
        self.entries.remove(&hash(entry));
    }

    /// Returns an iterator over the ring's entries, starting at the hash of the
    /// given key and wrapping around.
    fn entries_starting_at<K: Hash>(&self, key: &K) -> impl Iterator<Item = &T> {
        let hash = hash(key);
        self.entries
            .range(hash..)
            .chain(self.entries.range(..hash))
            .map(|(_, entry)| entry)
    }
}

impl<T> Default for ConsistentHashRing<T> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

fn hash<T: Hash + ?Sized>(data: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish()
}

#[derive(PartialEq, Eq, Hash)]
struct VirtualNode {
    node_id: String,
    virtual_id: u32,
}

#[derive(PartialEq, Eq, Hash)]
struct VirtualThread {
    thread_id: u32,
    virtual_id: u32,
}
