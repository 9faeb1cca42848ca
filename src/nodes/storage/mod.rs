//! The main storage nodes.

pub use self::gossip::{GOSSIP_PERIOD, REPORT_PERIOD};
use self::report::ReportData;
use crate::{
    config::Config,
    messages::{
        self,
        cluster_membership::ClusterInfo,
        request::{Request, RequestData},
        response::{Response, ResponseType},
        Tier,
    },
    metadata::{KeyProperty, MetadataKey, TierMetadata},
    nodes::request_cluster_info,
    placement::{KeyReplication, PlacementOracle, RingPlacement},
    serializer::{serializer_map, SerializerMap},
    store::LatticeStore,
    topics::{RoutingThread, StorageThread},
    ClientKey, Key, LatticeType, MeldError, ZenohValueAsString, ALL_TIERS,
};
use eyre::{anyhow, bail, Context};
use futures::{future::FusedFuture, Future, FutureExt, StreamExt};
use rand::{prelude::SliceRandom, rngs::SmallRng, SeedableRng};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    mem,
    path::PathBuf,
    rc::Rc,
    sync::Arc,
    time::Instant,
};

mod gossip;
mod handlers;
mod report;

/// Starts a new multithreaded storage node based on the given config.
///
/// The tier that the node serves is selected through the `SERVER_TYPE`
/// environment variable (`memory` or `ebs`); it defaults to the memory tier.
pub fn run(config: &Config, zenoh: Arc<zenoh::Session>, zenoh_prefix: String) -> eyre::Result<()> {
    let self_tier = match std::env::var("SERVER_TYPE").as_deref() {
        Ok("memory") => Tier::Memory,
        Ok("ebs") => Tier::Disk,
        Ok(other) => bail!(
            "Unrecognized server type `{}`. Valid types are `memory` and `ebs`.",
            other
        ),
        Err(std::env::VarError::NotPresent) => {
            log::info!(
                "No server type specified. The default behavior is to start the \
                server in memory mode."
            );
            Tier::Memory
        }
        Err(std::env::VarError::NotUnicode(_)) => bail!("SERVER_TYPE is not valid unicode"),
    };

    let mut tier_metadata = HashMap::new();
    tier_metadata.insert(
        Tier::Memory,
        TierMetadata {
            thread_number: config.threads.memory,
            default_replication: config.replication.memory,
            node_capacity: config.capacities.memory_cap * 1_000_000,
        },
    );
    tier_metadata.insert(
        Tier::Disk,
        TierMetadata {
            thread_number: config.threads.ebs,
            default_replication: config.replication.ebs,
            node_capacity: config.capacities.ebs_cap * 1_000_000,
        },
    );

    let thread_num = tier_metadata[&self_tier].thread_number;

    let node_id = format!("storage-{}", uuid::Uuid::new_v4());
    log::info!("Node {} starting up..", node_id);

    let config_data = ConfigData {
        self_tier,
        tier_metadata,
        thread_num,
        default_local_replication: config.replication.local,
        ebs_root: config.ebs.clone(),
        warmup: config.warmup,
    };

    // start one cooperative event loop per storage thread; each thread owns
    // a disjoint shard of state and communicates only via messages
    crossbeam_utils::thread::scope(|s| {
        let (shutdown_tx, shutdown) = smol::channel::unbounded::<()>();
        let (result_tx, task_errors) = smol::channel::unbounded();

        for thread_id in 0..thread_num {
            let config_data = config_data.clone();
            let zenoh = zenoh.clone();
            let zenoh_prefix = zenoh_prefix.clone();
            let node_id = node_id.clone();
            let result_tx = result_tx.clone();
            let mut shutdown = shutdown.clone();

            let task = async move {
                let node = StorageNode::init(
                    node_id.clone(),
                    thread_id,
                    config_data,
                    zenoh,
                    zenoh_prefix,
                )
                .await?;
                node.run(shutdown.next().map(|_| ()))
                    .await
                    .context(format!("storage thread {}/{} failed", node_id, thread_id))
            };
            s.spawn(move |_| {
                smol::block_on(async {
                    match task.await {
                        Ok(()) => {}
                        Err(err) => {
                            let _ = result_tx.send(err).await;
                        }
                    }
                })
            });
        }

        mem::drop(result_tx);
        mem::drop(shutdown);

        smol::block_on(task_errors.recv().map(|recv_result| match recv_result {
            Ok(error) => {
                shutdown_tx.close();
                Err(error)
            }
            Err(smol::channel::RecvError) => Ok(()),
        }))
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;

    Ok(())
}

/// A storage node thread.
///
/// Each thread runs a single-threaded cooperative event loop (see
/// [`run`][Self::run]) and owns a disjoint shard of state. There is no shared
/// mutable state between threads; all coordination happens via messages.
pub struct StorageNode<P: PlacementOracle> {
    /// The node ID of the node thread.
    node_id: String,
    /// The thread ID of the node thread.
    thread_id: u32,

    /// A counter that is increased if a node is re-joining.
    self_join_count: u32,

    /// Used for addressing itself.
    ///
    /// Must be consistent with the `node_id` and `thread_id` fields.
    ///
    /// The `wt` name is short for "worker thread".
    wt: StorageThread,

    /// Information about the cluster and its nodes.
    membership: ClusterInfo,

    /// The relevant parts of the config file.
    config_data: ConfigData,

    /// Used for communicating with other nodes.
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,

    /// Resolves keys to responsible threads; injected so that tests can
    /// replace the hash-ring policy with a fixed mock.
    placement: P,

    /// In-memory lattice values that this thread is responsible for.
    ///
    /// Only accessed through the serializer adapters; on disk-tier threads
    /// it stays empty.
    store: Rc<RefCell<LatticeStore<Key>>>,

    /// One serializer adapter per lattice type, for this thread's tier.
    serializers: SerializerMap,

    /// Size and lattice type of every key stored on this thread.
    ///
    /// An entry is created by the first successful PUT and fixes the key's
    /// lattice type from then on.
    key_properties: HashMap<Key, KeyProperty>,

    /// Caches the replication factors for each key.
    key_replication_map: HashMap<ClientKey, KeyReplication>,

    /// Keeps track of the start time of the current gossip period.
    ///
    /// Set to the current time after gossip was sent out.
    gossip_start: Instant,

    /// Seeded per-thread RNG, used for picking replication-fetch targets.
    rng: SmallRng,

    // for periodically redistributing data when a node joins
    join_gossip_map: HashMap<String, HashSet<Key>>,

    // keeps track of which keys should be removed when a node joins
    join_remove_set: HashSet<Key>,

    // work deferred because replication metadata is not resolved yet
    pending_requests: HashMap<Key, Vec<PendingRequest>>,
    pending_gossip: HashMap<Key, Vec<PendingGossip>>,

    // the set of keys mutated on this thread since the last round of gossip
    local_changeset: HashSet<Key>,

    /// The node collects some statistics and reports them periodically into
    /// the metadata key space.
    report_data: ReportData,
}

impl StorageNode<RingPlacement> {
    /// Creates a new storage node thread, requesting the cluster membership
    /// from the routing tier.
    pub async fn init(
        node_id: String,
        thread_id: u32,
        config_data: ConfigData,
        zenoh: Arc<zenoh::Session>,
        zenoh_prefix: String,
    ) -> eyre::Result<Self> {
        let membership = request_cluster_info(&zenoh, &zenoh_prefix).await?;
        let placement = RingPlacement::new(config_data.default_local_replication);

        Self::new(
            node_id,
            thread_id,
            membership,
            config_data,
            zenoh,
            zenoh_prefix,
            placement,
        )
    }
}

impl<P: PlacementOracle> StorageNode<P> {
    /// Creates a new storage node thread in the given cluster, using the given
    /// placement oracle.
    pub fn new(
        node_id: String,
        thread_id: u32,
        membership: ClusterInfo,
        config_data: ConfigData,
        zenoh: Arc<zenoh::Session>,
        zenoh_prefix: String,
        mut placement: P,
    ) -> eyre::Result<Self> {
        let self_join_count = 0;

        for tier in &membership.tiers {
            for server in &tier.servers {
                placement.join_node(tier.tier_id, server, 0);
            }
        }
        placement.join_node(config_data.self_tier, &node_id, self_join_count);
        for (&tier, tier_meta) in config_data.tier_metadata.iter() {
            for thread_id in 0..tier_meta.thread_number {
                placement.join_thread(tier, thread_id);
            }
        }

        let store = Rc::new(RefCell::new(LatticeStore::default()));
        let serializers = serializer_map(
            config_data.self_tier,
            &store,
            &config_data.ebs_root,
            thread_id,
        )?;

        let mut node = Self {
            wt: StorageThread::new(node_id.clone(), thread_id),
            node_id,
            thread_id,
            self_join_count,
            membership,
            zenoh,
            zenoh_prefix,
            placement,
            store,
            serializers,
            gossip_start: Instant::now(),
            rng: SmallRng::seed_from_u64(thread_id.into()),
            report_data: ReportData::new(),
            key_properties: Default::default(),
            key_replication_map: Default::default(),
            join_gossip_map: Default::default(),
            join_remove_set: Default::default(),
            pending_requests: Default::default(),
            pending_gossip: Default::default(),
            local_changeset: Default::default(),
            config_data,
        };

        if node.config_data.warmup {
            node.warm_up_replication_defaults();
        }

        Ok(node)
    }

    /// Starts the storage node thread.
    ///
    /// The loop blocks only at the `select!` boundary; every handler runs to
    /// completion before the next message is processed, so messages are
    /// handled in arrival order.
    pub async fn run(
        mut self,
        mut shutdown_signal: impl Future<Output = ()> + FusedFuture + Unpin,
    ) -> eyre::Result<()> {
        // thread 0 notifies the other nodes that it has joined
        if self.thread_id == 0 {
            let join_msg = messages::Join {
                tier: self.config_data.self_tier,
                node_id: self.node_id.clone(),
                join_count: self.self_join_count,
            };
            let serialized =
                serde_json::to_string(&join_msg).context("failed to serialize join message")?;

            for &tier in ALL_TIERS {
                for node_id in self.placement.member_nodes(tier) {
                    if node_id != self.node_id {
                        self.zenoh
                            .put(
                                &StorageThread::new(node_id, 0).node_join_topic(&self.zenoh_prefix),
                                serialized.as_str(),
                            )
                            .await
                            .map_err(|e| eyre::eyre!(e))
                            .context("failed to send join message to servers")?;
                    }
                }
            }

            let notify_msg = serde_json::to_string(&messages::Notify::Join(join_msg))
                .context("failed to serialize notify message")?;

            // notify the routing tier that this node has joined
            for node_id in &self.membership.routing_node_ids {
                self.zenoh
                    .put(
                        &RoutingThread::new(node_id.clone(), 0).notify_topic(&self.zenoh_prefix),
                        notify_msg.as_str(),
                    )
                    .await
                    .map_err(|e| eyre::eyre!(e))
                    .context("failed to send join message to routing nodes")?;
            }
        }

        let zenoh = self.zenoh.clone();

        // listens for a new node joining
        let mut join_subscriber = zenoh
            .subscribe(&self.wt.node_join_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare join subscriber")?;
        let mut join_stream = join_subscriber.receiver().fuse();

        // listens for a node departing
        let mut depart_subscriber = zenoh
            .subscribe(&self.wt.node_depart_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare depart subscriber")?;
        let mut depart_stream = depart_subscriber.receiver().fuse();

        // responsible for listening for a command that this node should leave
        let mut self_depart_subscriber = zenoh
            .subscribe(&self.wt.self_depart_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare self depart subscriber")?;
        let mut self_depart_stream = self_depart_subscriber.receiver().fuse();

        // responsible for handling requests
        let mut request_subscriber = zenoh
            .subscribe(&self.wt.request_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare request subscriber")?;
        let mut request_stream = request_subscriber.receiver().fuse();

        // responsible for processing gossip
        let mut gossip_subscriber = zenoh
            .subscribe(&self.wt.gossip_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare gossip subscriber")?;
        let mut gossip_stream = gossip_subscriber.receiver().fuse();

        // responsible for listening for key replication factor responses
        let mut replication_response_subscriber = zenoh
            .subscribe(&self.wt.replication_response_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare replication response subscriber")?;
        let mut replication_response_stream = replication_response_subscriber.receiver().fuse();

        // responsible for listening for key replication factor changes
        let mut replication_change_subscriber = zenoh
            .subscribe(&self.wt.replication_change_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to declare replication change subscriber")?;
        let mut replication_change_stream = replication_change_subscriber.receiver().fuse();

        // self-timer, so that gossip and reports also go out on an idle node
        let mut gossip_tick = futures_timer::Delay::new(GOSSIP_PERIOD).fuse();

        loop {
            futures::select! {
                sample = join_stream.select_next_some() => {
                    let message = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize join message")?;
                    self.node_join_handler(message).await.context("failed to handle join")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                sample = depart_stream.select_next_some() => {
                    let message = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize depart message")?;
                    self.node_depart_handler(message).await.context("failed to handle depart")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                sample = self_depart_stream.select_next_some() => {
                    self.self_depart_handler(&sample.value.as_string()?)
                        .await.context("failed to handle self depart")?;
                    // the thread has handed off its data and left the cluster
                    break;
                },
                sample = request_stream.select_next_some() => {
                    let message = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize request message")?;
                    self.request_handler(message).await.context("failed to handle request")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                sample = gossip_stream.select_next_some() =>  {
                    self.gossip_handler(&sample.value.as_string()?)
                        .await.context("failed to handle gossip")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                sample = replication_response_stream.select_next_some() => {
                    let message = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize replication response")?;
                    self.replication_response_handler(message)
                        .await.context("failed to handle replication response")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                sample = replication_change_stream.select_next_some() => {
                    self.replication_change_handler(&sample.value.as_string()?)
                        .await.context("failed to handle replication change")?;
                    self.gossip_updates().await.context("failed to gossip updates")?;
                },
                () = gossip_tick => {
                    self.gossip_updates().await.context("failed to gossip updates")?;
                    gossip_tick = futures_timer::Delay::new(GOSSIP_PERIOD).fuse();
                },
                () = shutdown_signal => break,
                complete => break,
            }
        }

        Ok(())
    }

    /// Reads the current value of a key through the serializer selected by the
    /// key's property entry.
    fn process_get(&self, key: &Key) -> Result<(LatticeType, Vec<u8>), MeldError> {
        let property = self
            .key_properties
            .get(key)
            .ok_or(MeldError::KeyDoesNotExist)?;
        let serializer = self
            .serializers
            .get(&property.lattice_type)
            .ok_or(MeldError::Lattice)?;
        let payload = serializer.get(key)?;
        Ok((property.lattice_type, payload))
    }

    /// Merges a serialized payload into a key through the serializer for the
    /// declared lattice type and updates the key's property entry.
    ///
    /// Callers must check for a lattice type conflict first (see
    /// [`Self::lattice_type_conflict`]).
    fn process_put(
        &mut self,
        key: &Key,
        lattice_type: LatticeType,
        payload: &[u8],
    ) -> Result<usize, MeldError> {
        let serializer = self
            .serializers
            .get_mut(&lattice_type)
            .ok_or(MeldError::Lattice)?;
        let size = serializer.put(key, payload)?;
        self.key_properties.insert(
            key.clone(),
            KeyProperty {
                size,
                lattice_type,
            },
        );
        Ok(size)
    }

    /// Returns `true` if the key already stores a value of a different lattice
    /// type than the declared one.
    fn lattice_type_conflict(&self, key: &Key, declared: LatticeType) -> bool {
        self.key_properties
            .get(key)
            .map_or(false, |property| property.lattice_type != declared)
    }

    /// Removes a key from this thread's backend and bookkeeping.
    fn remove_key_local(&mut self, key: &Key) {
        if let Some(property) = self.key_properties.remove(key) {
            if let Some(serializer) = self.serializers.get_mut(&property.lattice_type) {
                serializer.remove(key);
            }
        }
        self.local_changeset.remove(key);
    }

    /// Sends a replication-factor GET for the given key to a random thread
    /// that is responsible for the key's replication metadata.
    ///
    /// The response will arrive on this thread's replication response topic.
    async fn issue_replication_factor_request(&mut self, key: ClientKey) -> eyre::Result<()> {
        log::info!("issuing replication factor request for key {}", key);
        let replication_key = MetadataKey::Replication { key };
        let threads = self
            .placement
            .responsible_threads_metadata(&replication_key)?;

        let target = threads
            .choose(&mut self.rng)
            .ok_or_else(|| anyhow!("no responsible threads"))?
            .clone();

        let key_request = Request {
            request: RequestData::Get {
                keys: vec![replication_key.into()],
            },
            response_address: Some(self.wt.replication_response_topic(&self.zenoh_prefix)),
            request_id: None,
            address_cache_size: Default::default(),
        };
        let serialized =
            serde_json::to_string(&key_request).context("failed to serialize key request")?;

        self.zenoh
            .put(&target.request_topic(&self.zenoh_prefix), serialized)
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to send replication factor request")?;

        Ok(())
    }

    /// Sends a serialized [`Response`] to the given topic.
    async fn send_response(&self, addr: &str, response: &Response) -> eyre::Result<()> {
        let serialized =
            serde_json::to_string(response).context("failed to serialize key response")?;
        self.zenoh
            .put(addr, serialized)
            .await
            .map_err(|e| eyre::eyre!(e))
            .context("failed to send response")?;
        Ok(())
    }

    /// The default replication factors of this cluster, per tier.
    fn default_replication(&self) -> KeyReplication {
        let mut replication = KeyReplication::default();
        for &tier in ALL_TIERS {
            replication.global_replication.insert(
                tier,
                self.config_data.tier_metadata[&tier].default_replication,
            );
            replication
                .local_replication
                .insert(tier, self.config_data.default_local_replication);
        }
        replication
    }

    /// Installs the default replication factors for the given key.
    fn init_replication(&mut self, key: ClientKey) {
        let replication = self.default_replication();
        self.key_replication_map.insert(key, replication);
    }

    /// Pre-populates the replication cache with default factors for one
    /// million synthetic 8-digit keys.
    ///
    /// Only used for benchmark runs; enabled through the `warmup` config flag.
    fn warm_up_replication_defaults(&mut self) {
        let replication = self.default_replication();
        for i in 1..=1_000_000u32 {
            let key = ClientKey::from(format!("{:08}", i));
            self.key_replication_map.insert(key, replication.clone());
        }
    }
}

/// Configuration options for storage nodes.
#[derive(Debug, Clone)]
pub struct ConfigData {
    /// The tier in which the node should run.
    pub self_tier: Tier,
    /// The number of threads that exist for this storage node.
    pub thread_num: u32,
    /// The default intra-node replication factor.
    pub default_local_replication: usize,
    /// Metadata for all available tiers.
    pub tier_metadata: HashMap<Tier, TierMetadata>,
    /// Root directory for the disk tier's per-key files.
    pub ebs_root: PathBuf,
    /// Pre-populate the replication cache with benchmark defaults on startup.
    pub warmup: bool,
}

/// A client request that was deferred because the replication factors of its
/// key were not resolved yet.
#[derive(Debug)]
struct PendingRequest {
    ty: ResponseType,
    lattice_type: Option<LatticeType>,
    payload: Option<Vec<u8>>,
    addr: Option<String>,
    response_id: Option<String>,
}

impl PendingRequest {
    fn new_response(&self) -> Response {
        Response {
            response_id: self.response_id.clone(),
            ty: self.ty,
            tuples: Default::default(),
            error: Ok(()),
        }
    }
}

/// An inbound gossip value that was deferred because the replication factors
/// of its key were not resolved yet.
struct PendingGossip {
    lattice_type: LatticeType,
    payload: Vec<u8>,
}

#[cfg(test)]
fn test_config_data() -> ConfigData {
    let mut tier_metadata = HashMap::new();
    tier_metadata.insert(
        Tier::Memory,
        TierMetadata {
            thread_number: 1,
            default_replication: 1,
            node_capacity: 1_000_000,
        },
    );
    tier_metadata.insert(
        Tier::Disk,
        TierMetadata {
            thread_number: 1,
            default_replication: 1,
            node_capacity: 1_000_000,
        },
    );
    ConfigData {
        self_tier: Tier::Memory,
        thread_num: 1,
        default_local_replication: 1,
        tier_metadata,
        ebs_root: std::env::temp_dir(),
        warmup: false,
    }
}

/// Creates a single-threaded test node that is responsible for every key
/// through its own consistent hash ring.
#[cfg(test)]
fn storage_test_instance(
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
) -> StorageNode<RingPlacement> {
    StorageNode::new(
        "server_id".into(),
        0,
        // empty cluster
        ClusterInfo {
            tiers: Vec::new(),
            routing_node_ids: Vec::new(),
        },
        test_config_data(),
        zenoh,
        zenoh_prefix,
        RingPlacement::new(1),
    )
    .expect("failed to create test node")
}

/// Creates a test node with an injected placement oracle.
#[cfg(test)]
fn storage_test_instance_with<P: PlacementOracle>(
    placement: P,
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
) -> StorageNode<P> {
    StorageNode::new(
        "server_id".into(),
        0,
        ClusterInfo {
            tiers: Vec::new(),
            routing_node_ids: Vec::new(),
        },
        test_config_data(),
        zenoh,
        zenoh_prefix,
        placement,
    )
    .expect("failed to create test node")
}
