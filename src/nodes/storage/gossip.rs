use super::StorageNode;
use crate::{
    messages::{
        key_data::KeySize,
        request::{PutTuple, RequestData},
        Request, Tier,
    },
    nodes::storage::report::ReportMessage,
    placement::PlacementOracle,
    ClientKey, Key, ALL_TIERS,
};
use eyre::{eyre, Context};
use rand::prelude::SliceRandom;
use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    time::{Duration, Instant},
};

// the maximum number of keys that are handed off per address per round after
// a node join
const DATA_REDISTRIBUTE_THRESHOLD: usize = 50;

// stored bytes after which keys this thread no longer owns are dropped
const GARBAGE_COLLECT_THRESHOLD: usize = 10_000_000;

/// The interval between two gossip messages.
pub const GOSSIP_PERIOD: Duration = Duration::from_secs(10);

/// The interval between two report messages.
pub const REPORT_PERIOD: Duration = Duration::from_secs(15);

/// Gossip and reporting functions.
impl<P: PlacementOracle> StorageNode<P> {
    /// Gossips updates to other nodes, reports statistics, redistributes data
    /// after node joins, and garbage collects disowned keys.
    ///
    /// Gossip updates are only sent if the time since the last sent gossip exceeds
    /// [`GOSSIP_PERIOD`]. Similarly, report messages are only sent if the time since
    /// the last report exceeds [`REPORT_PERIOD`].
    pub async fn gossip_updates(&mut self) -> eyre::Result<()> {
        // gossip updates to other threads
        let gossip_end = Instant::now();
        if gossip_end - self.gossip_start >= GOSSIP_PERIOD {
            self.send_out_gossip().await?;
        }

        // collect and store internal statistics in the metadata key space
        let report_end = Instant::now();
        let duration = report_end - self.report_data.report_start();
        if duration >= REPORT_PERIOD {
            self.send_out_report(duration).await?;
        }

        // redistribute data after node joins; redistribution takes priority
        // over regular gossip, at most DATA_REDISTRIBUTE_THRESHOLD keys per
        // address per round
        if !self.join_gossip_map.is_empty() {
            let mut remove_address_set = HashSet::new();
            let mut addr_keyset_map: HashMap<String, HashSet<Key>> = HashMap::new();

            for (address, key_set) in &mut self.join_gossip_map {
                // track all sent keys because we cannot modify the key_set while
                // iterating over it
                let mut sent_keys = HashSet::new();

                let addr_keyset_map_entry = addr_keyset_map.entry(address.clone()).or_default();
                for key in key_set.iter() {
                    addr_keyset_map_entry.insert(key.clone());
                    sent_keys.insert(key.clone());
                    if sent_keys.len() >= DATA_REDISTRIBUTE_THRESHOLD {
                        break;
                    }
                }

                // remove the keys we just dealt with
                for key in sent_keys {
                    key_set.remove(&key);
                }

                if key_set.is_empty() {
                    remove_address_set.insert(address.clone());
                }
            }

            for remove_address in remove_address_set {
                self.join_gossip_map.remove(&remove_address);
            }

            self.send_gossip(&addr_keyset_map).await?;

            // remove handed-off keys once all addresses are drained
            if self.join_gossip_map.is_empty() {
                let removed: Vec<_> = self.join_remove_set.drain().collect();
                for key in removed {
                    self.remove_key_local(&key);
                }
            }
        }

        // drop keys this thread is no longer responsible for once the stored
        // bytes exceed the garbage collection threshold
        let consumption: usize = self.key_properties.values().map(|p| p.size).sum();
        if consumption > GARBAGE_COLLECT_THRESHOLD {
            self.garbage_collect()?;
        }

        Ok(())
    }

    /// Sends out gossip messages to the peer replicas of every changed key.
    async fn send_out_gossip(&mut self) -> eyre::Result<()> {
        let work_start = Instant::now();

        let mut addr_keyset_map: HashMap<String, HashSet<Key>> = HashMap::new();
        for key in self.local_changeset.drain() {
            // get the threads that we need to gossip to
            let threads = self.placement.responsible_threads(
                &key,
                &self.key_replication_map,
                ALL_TIERS,
            )?;

            if let Some(threads) = threads {
                for thread in &threads {
                    if thread != &self.wt {
                        addr_keyset_map
                            .entry(thread.gossip_topic(&self.zenoh_prefix))
                            .or_default()
                            .insert(key.clone());
                    }
                }
            } else {
                log::error!("Missing key replication factor in gossip routine.");
            }
        }

        if !addr_keyset_map.is_empty() {
            self.send_gossip(&addr_keyset_map)
                .await
                .context("failed to send gossip")?;
        }

        self.gossip_start = Instant::now();
        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 9);

        Ok(())
    }

    /// Sends out report messages with various statistics.
    async fn send_out_report(&mut self, duration: Duration) -> eyre::Result<()> {
        let primary_key_sizes = self.primary_key_sizes();
        let report_messages = self.report_data.next_epoch(
            duration,
            self.config_data.self_tier,
            &self.wt,
            primary_key_sizes,
        )?;

        for ReportMessage { key, message } in report_messages {
            let threads = self.placement.responsible_threads_metadata(&key)?;
            if !threads.is_empty() {
                let target = threads.choose(&mut self.rng).unwrap();
                let target_address = target.request_topic(&self.zenoh_prefix);
                let serialized = serde_json::to_string(&message)
                    .context("failed to serialize report request message")?;
                self.zenoh
                    .put(&target_address, serialized)
                    .await
                    .map_err(|e| eyre!(e))?;
            }
        }
        Ok(())
    }

    /// Sends the gossip messages for the given address keyset map.
    ///
    /// Builds exactly one batched PUT request per peer address, with the
    /// tuples read through the serializers. Keys whose stored value cannot be
    /// read (e.g. removed in the meantime) are skipped.
    pub(super) async fn send_gossip(
        &self,
        addr_keyset_map: &HashMap<String, HashSet<Key>>,
    ) -> eyre::Result<()> {
        let mut gossip_map = HashMap::new();

        for (address, keys) in addr_keyset_map {
            let mut tuples = Vec::new();
            for key in keys {
                if let Ok((lattice_type, payload)) = self.process_get(key) {
                    tuples.push(PutTuple {
                        key: key.clone(),
                        lattice_type,
                        payload,
                    });
                }
            }
            let request = Request {
                request: RequestData::Put { tuples },
                response_address: Default::default(),
                request_id: Default::default(),
                address_cache_size: Default::default(),
            };
            gossip_map.insert(address, request);
        }

        // send gossip
        for (addr, msg) in gossip_map {
            let serialized =
                serde_json::to_string(&msg).context("failed to serialize key request")?;
            self.zenoh
                .put(addr, serialized)
                .await
                .map_err(|e| eyre!(e))
                .context("failed to send gossip message")?;
        }

        Ok(())
    }

    /// Drops all keys that this thread is no longer responsible for.
    ///
    /// Only considers keys whose replication factors are already cached; no
    /// metadata fetches are issued from here.
    fn garbage_collect(&mut self) -> eyre::Result<()> {
        let mut disowned = Vec::new();
        for key in self.key_properties.keys() {
            let threads = self.placement.responsible_threads(
                key,
                &self.key_replication_map,
                &[self.config_data.self_tier],
            )?;
            if let Some(threads) = threads {
                if !threads.contains(&self.wt) {
                    disowned.push(key.clone());
                }
            }
        }

        if !disowned.is_empty() {
            log::info!("Garbage collecting {} disowned keys.", disowned.len());
        }
        for key in disowned {
            self.remove_key_local(&key);
        }

        Ok(())
    }

    /// Returns the storage consumption of all primary key replicas on this thread.
    pub(super) fn primary_key_sizes(&self) -> Vec<KeySize> {
        let mut ret = Vec::new();
        for (key, property) in &self.key_properties {
            if let Ok(key) = ClientKey::try_from(key.clone()) {
                if self.is_primary_replica(&key) {
                    ret.push(KeySize {
                        key,
                        size: property.size,
                    });
                }
            }
        }
        ret
    }

    /// Checks if this thread should be considered the main replica of the given key.
    ///
    /// Used for estimating storage consumption (non-primary replicas are ignored).
    fn is_primary_replica(&self, key: &ClientKey) -> bool {
        let self_tier = self.config_data.self_tier;
        if self
            .key_replication_map
            .get(key)
            .and_then(|replication| replication.global_replication.get(&self_tier))
            .copied()
            .unwrap_or_default()
            == 0
        {
            return false;
        }

        if self_tier == Tier::Disk {
            // a memory-tier replica takes precedence as the primary
            if self
                .key_replication_map
                .get(key)
                .and_then(|r| r.global_replication.get(&Tier::Memory))
                .map(|&rep_factor| rep_factor > 0)
                .unwrap_or(false)
            {
                return false;
            }
        }

        self.placement
            .primary_thread(self_tier, &key.clone().into())
            .map(|primary| primary == self.wt)
            .unwrap_or(false)
    }
}
