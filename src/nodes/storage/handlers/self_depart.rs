use crate::{
    messages::{self, Departed, SelfDepart},
    nodes::storage::StorageNode,
    placement::PlacementOracle,
    topics::{RoutingThread, StorageThread},
    Key, ALL_TIERS,
};
use eyre::Context;
use std::collections::{HashMap, HashSet};

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming self depart messages.
    ///
    /// The thread hands all of its keys off to the remaining responsible
    /// threads, acknowledges the departure on the requested topic, and the
    /// event loop exits afterwards.
    pub async fn self_depart_handler(&mut self, serialized: &str) -> eyre::Result<()> {
        let self_depart: SelfDepart =
            serde_json::from_str(serialized).context("failed to deserialize SelfDepart")?;
        let ack_topic = self_depart.response_topic;

        log::info!("This node is departing.");
        self.placement
            .depart_node(self.config_data.self_tier, &self.node_id.clone());

        // thread 0 notifies the other nodes in the cluster that it is leaving
        if self.thread_id == 0 {
            let depart_message = messages::Departed {
                tier: self.config_data.self_tier,
                node_id: self.node_id.clone(),
            };
            let serialized_depart = serde_json::to_string(&depart_message)
                .context("failed to serialize depart message")?;

            for &tier in ALL_TIERS {
                for node_id in self.placement.member_nodes(tier) {
                    self.zenoh
                        .put(
                            &StorageThread::new(node_id, 0).node_depart_topic(&self.zenoh_prefix),
                            serialized_depart.as_str(),
                        )
                        .await
                        .map_err(|e| eyre::eyre!(e))?;
                }
            }

            let notify_message = serde_json::to_string(&messages::Notify::Depart(depart_message))
                .context("failed to serialize notify message")?;

            // notify the routing tier
            for node_id in &self.membership.routing_node_ids {
                self.zenoh
                    .put(
                        &RoutingThread::new(node_id.clone(), 0).notify_topic(&self.zenoh_prefix),
                        notify_message.as_str(),
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))?;
            }

            // tell all worker threads about the self departure
            for tid in 1..self.config_data.thread_num {
                self.zenoh
                    .put(
                        &StorageThread::new(self.node_id.clone(), tid)
                            .self_depart_topic(&self.zenoh_prefix),
                        serialized,
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))?;
            }
        }

        // hand all stored keys off to the threads that remain responsible;
        // this thread is already removed from the ring
        let mut addr_keyset_map: HashMap<String, HashSet<Key>> = HashMap::new();
        for key in self.key_properties.keys() {
            let threads =
                self.placement
                    .responsible_threads(key, &self.key_replication_map, ALL_TIERS)?;

            if let Some(threads) = threads {
                for thread in threads {
                    addr_keyset_map
                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                        .or_default()
                        .insert(key.clone());
                }
            } else {
                log::error!("Missing key replication factor in node depart routine");
            }
        }

        self.send_gossip(&addr_keyset_map).await?;

        self.zenoh
            .put(
                &ack_topic,
                serde_json::to_string(&Departed {
                    tier: self.config_data.self_tier,
                    node_id: self.node_id.clone(),
                })?,
            )
            .await
            .map_err(|e| eyre::eyre!(e))?;

        Ok(())
    }
}
