use crate::{
    messages::replication_factor::ReplicationFactorUpdate,
    nodes::storage::StorageNode,
    placement::PlacementOracle,
    topics::StorageThread,
    Key, ALL_TIERS,
};
use eyre::Context;
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming replication change messages.
    ///
    /// Overwrites the cached replication factors for every listed key. A
    /// thread that stops being responsible for a key gossips it to the new
    /// responsible threads and drops it locally.
    pub async fn replication_change_handler(&mut self, serialized: &str) -> eyre::Result<()> {
        let work_start = Instant::now();

        log::info!("Received a replication factor change.");
        if self.thread_id == 0 {
            // tell all worker threads about the replication factor change
            for tid in 1..self.config_data.thread_num {
                self.zenoh
                    .put(
                        &StorageThread::new(self.node_id.clone(), tid)
                            .replication_change_topic(&self.zenoh_prefix),
                        serialized,
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))?;
            }
        }

        let rep_change: ReplicationFactorUpdate = serde_json::from_str(serialized)
            .context("failed to deserialize ReplicationFactorUpdate")?;

        let mut addr_keyset_map: HashMap<String, HashSet<Key>> = HashMap::new();
        let mut remove_set = HashSet::new();

        for key_rep in rep_change.updates {
            let key = key_rep.key.clone();

            // if this thread has the key stored before the change
            if self.key_properties.contains_key(&Key::from(&key)) {
                let orig_threads = self.placement.responsible_threads(
                    &Key::from(&key),
                    &self.key_replication_map,
                    ALL_TIERS,
                )?;

                if let Some(orig_threads) = orig_threads {
                    // update the replication factor and check whether it shrank
                    let mut decrement = false;
                    {
                        let key_replication =
                            self.key_replication_map.entry(key.clone()).or_default();

                        for global in key_rep.global {
                            if Some(&global.value)
                                < key_replication.global_replication.get(&global.tier)
                            {
                                decrement = true;
                            }
                            key_replication
                                .global_replication
                                .insert(global.tier, global.value);
                        }

                        for local in key_rep.local {
                            if Some(&local.value)
                                < key_replication.local_replication.get(&local.tier)
                            {
                                decrement = true;
                            }
                            key_replication
                                .local_replication
                                .insert(local.tier, local.value);
                        }
                    }

                    let threads = self.placement.responsible_threads(
                        &Key::from(&key),
                        &self.key_replication_map,
                        ALL_TIERS,
                    )?;

                    if let Some(threads) = threads {
                        if !threads.contains(&self.wt) {
                            // this thread is no longer responsible for this key
                            remove_set.insert(Key::from(&key));

                            // add all the new threads that this key should be sent to
                            for thread in &threads {
                                addr_keyset_map
                                    .entry(thread.gossip_topic(&self.zenoh_prefix))
                                    .or_default()
                                    .insert(Key::from(&key));
                            }
                        }

                        // `decrement` represents whether the total global or local rep
                        // factor has been reduced; if that's not the case, and I am the
                        // "first" thread responsible for this key, then I gossip it to
                        // the new threads that are responsible for it
                        if !decrement
                            && orig_threads
                                .first()
                                .map(|t| t.node_id == self.wt.node_id)
                                .unwrap_or(false)
                        {
                            for thread in threads {
                                if !orig_threads.contains(&thread) {
                                    addr_keyset_map
                                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                                        .or_default()
                                        .insert(Key::from(&key));
                                }
                            }
                        }
                    } else {
                        log::error!("Missing key replication factor in rep factor change routine.");
                    }
                } else {
                    log::error!("Missing key replication factor in rep factor change routine.");

                    // just update the replication factor
                    let key_replication = self.key_replication_map.entry(key.clone()).or_default();
                    for global in key_rep.global {
                        key_replication
                            .global_replication
                            .insert(global.tier, global.value);
                    }
                    for local in key_rep.local {
                        key_replication
                            .local_replication
                            .insert(local.tier, local.value);
                    }
                }
            } else {
                // just update the replication factor
                let key_replication = self.key_replication_map.entry(key.clone()).or_default();
                for global in key_rep.global {
                    key_replication
                        .global_replication
                        .insert(global.tier, global.value);
                }
                for local in key_rep.local {
                    key_replication
                        .local_replication
                        .insert(local.tier, local.value);
                }
            }
        }

        self.send_gossip(&addr_keyset_map).await?;

        // remove keys this thread no longer owns
        for key in remove_set {
            self.remove_key_local(&key);
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 6);

        Ok(())
    }
}
