use crate::{
    messages, nodes::storage::StorageNode, placement::tier_name, placement::PlacementOracle,
    topics::StorageThread,
};
use eyre::Context;
use std::time::Instant;

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming node depart messages.
    pub async fn node_depart_handler(&mut self, message: messages::Departed) -> eyre::Result<()> {
        let work_start = Instant::now();

        let serialized =
            serde_json::to_string(&message).context("failed to serialize Departed message")?;
        let messages::Departed {
            tier,
            node_id: departing_node_id,
        } = message;

        log::info!(
            "Received departure for node {} on tier {}.",
            departing_node_id,
            tier_name(tier)
        );

        // update the placement rings
        self.placement.depart_node(tier, &departing_node_id);

        if self.thread_id == 0 {
            // tell all worker threads about the node departure
            for tid in 1..self.config_data.thread_num {
                self.zenoh
                    .put(
                        &StorageThread::new(self.node_id.clone(), tid)
                            .node_depart_topic(&self.zenoh_prefix),
                        serialized.as_str(),
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))?;
            }
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 1);

        Ok(())
    }
}
