//! The node implementations, centered around the [`StorageNode`].

pub use self::storage::StorageNode;

use crate::{messages::cluster_membership::ClusterInfo, topics::RoutingThread, ZenohValueAsString};
use eyre::{bail, Context};
use futures::StreamExt;
use std::time::Duration;

pub mod storage;

/// Requests the cluster topology from a seed node of the routing tier.
///
/// The routing tier answers `get` queries on its seed topic with a serialized
/// [`ClusterInfo`]. Retries with increasing back-off while no routing node is
/// up yet.
pub async fn request_cluster_info(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
) -> eyre::Result<ClusterInfo> {
    let mut i = 0;
    let membership = loop {
        let replies = zenoh
            .get(&RoutingThread::seed_topic(zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to query seed node")?;

        let mut replies = replies.collect::<Vec<_>>().await;
        match replies.as_mut_slice() {
            [] if i < 30 => {
                futures_timer::Delay::new(Duration::from_millis(100 * i)).await;
                i += 1; // retry
            }
            [] => {
                bail!("no replies received from seed node");
            }
            [reply] => {
                break serde_json::from_str(&reply.sample.value.as_string()?)
                    .context("failed to deserialize ClusterInfo")?;
            }
            _ => bail!("multiple replies received from seed node"),
        };
    };
    Ok(membership)
}
