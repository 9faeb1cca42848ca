use crate::{
    messages, nodes::storage::StorageNode, placement::tier_name, placement::PlacementOracle,
    topics::StorageThread, ALL_TIERS,
};
use eyre::Context;
use std::time::Instant;

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming node join messages.
    ///
    /// Adds the node to the placement rings and, for same-tier joins, walks
    /// the stored keys to schedule handoff gossip to the joined node (and
    /// local removals for keys this thread no longer owns).
    pub async fn node_join_handler(&mut self, message: messages::Join) -> eyre::Result<()> {
        let work_start = Instant::now();

        let serialized =
            serde_json::to_string(&message).context("failed to serialize Join message")?;
        let messages::Join {
            tier,
            node_id: new_node_id,
            join_count,
        } = message;

        // update the placement rings
        let inserted = self.placement.join_node(tier, &new_node_id, join_count);

        if inserted {
            log::info!(
                "Received a node join for tier {}. New node is {}. It's join counter is {}.",
                tier_name(tier),
                new_node_id,
                join_count
            );

            // only thread 0 communicates with other nodes and receives join messages
            // and it communicates that information to non-0 threads on its own machine
            if self.thread_id == 0 {
                // send my ID to the new server node
                let msg = serde_json::to_string(&messages::Join {
                    tier: self.config_data.self_tier,
                    node_id: self.node_id.clone(),
                    join_count: self.self_join_count,
                })
                .context("failed to serialize join message")?;

                self.zenoh
                    .put(
                        &StorageThread::new(new_node_id.clone(), 0)
                            .node_join_topic(&self.zenoh_prefix),
                        msg.as_str(),
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))
                    .context("failed to send ip to new server node")?;

                // gossip the new node address between server nodes to ensure consistency
                for &tier in ALL_TIERS {
                    for node_id in self.placement.member_nodes(tier) {
                        // if the node is not myself and not the newly joined node, send
                        // the id of the newly joined node in case of a race condition
                        if node_id != self.node_id && node_id != new_node_id {
                            self.zenoh
                                .put(
                                    &StorageThread::new(node_id, 0)
                                        .node_join_topic(&self.zenoh_prefix),
                                    serialized.as_str(),
                                )
                                .await
                                .map_err(|e| eyre::eyre!(e))
                                .context(
                                    "failed to send id of new server node in case of a race \
                                    condition",
                                )?;
                        }
                    }
                }

                // tell all worker threads about the new node join
                for tid in 1..self.config_data.thread_num {
                    self.zenoh
                        .put(
                            &StorageThread::new(self.node_id.clone(), tid)
                                .node_join_topic(&self.zenoh_prefix),
                            serialized.as_str(),
                        )
                        .await
                        .map_err(|e| eyre::eyre!(e))
                        .context("failed to send id of new server node to workers")?;
                }
            }

            if tier == self.config_data.self_tier {
                for key in self.key_properties.keys() {
                    let threads = self.placement.responsible_threads(
                        key,
                        &self.key_replication_map,
                        &[self.config_data.self_tier],
                    )?;

                    if let Some(threads) = threads {
                        // there are two situations in which we gossip data to the joining
                        // node:
                        // 1) if the node is rejoining the cluster, and it is responsible
                        //    for the key
                        // 2) if the node is a new node and this thread is no longer
                        //    responsible for the key
                        if join_count > 0 {
                            for thread in &threads {
                                if thread.node_id == new_node_id {
                                    self.join_gossip_map
                                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                                        .or_default()
                                        .insert(key.clone());
                                }
                            }
                        } else if join_count == 0 && !threads.contains(&self.wt) {
                            self.join_remove_set.insert(key.clone());

                            for thread in &threads {
                                self.join_gossip_map
                                    .entry(thread.gossip_topic(&self.zenoh_prefix))
                                    .or_default()
                                    .insert(key.clone());
                            }
                        }
                    } else {
                        log::error!(
                            "Missing key replication factor in node join routine. This should \
                            never happen."
                        );
                    }
                }
            }
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 0);

        Ok(())
    }
}
