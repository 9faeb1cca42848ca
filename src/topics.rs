//! Defines the zenoh topic paths that should be used for messages.
//!
//! Allows to address specific threads of specific nodes.

// The topic on which storage threads listen for requests for data.
const KEY_REQUEST_TOPIC: &str = "key_request";

// The topic on which storage threads listen for gossip from replica peers.
const GOSSIP_TOPIC: &str = "gossip";

// The topic on which storage threads listen for replication factor responses.
const REPLICATION_RESPONSE_TOPIC: &str = "replication_response";

// The topic on which storage threads listen for replication factor changes.
const REPLICATION_CHANGE_TOPIC: &str = "replication_change";

// The topic on which storage threads listen for new node announcements.
const NODE_JOIN_TOPIC: &str = "node_join";

// The topic on which storage threads listen for node departures.
const NODE_DEPART_TOPIC: &str = "node_depart";

// The topic on which storage threads are asked to depart themselves.
const SELF_DEPART_TOPIC: &str = "self_depart";

// The topic on which clients receive responses from the store.
const USER_RESPONSE_TOPIC: &str = "user_response";

// The topic on which routing nodes answer cluster membership requests.
const SEED_TOPIC: &str = "seed";

// The topic on which routing nodes are notified of membership changes.
const ROUTING_NOTIFY_TOPIC: &str = "routing_notify";

/// Provides the topic paths for addressing a specific thread of a specific _storage_ node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StorageThread {
    /// The ID of the addressed storage node.
    pub node_id: String,
    /// The ID of the addressed thread on the storage node.
    pub thread_id: u32,
}

impl StorageThread {
    /// Address the given thread on the given node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// The topic on which [`Request`][crate::messages::Request] messages are sent.
    pub fn request_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, KEY_REQUEST_TOPIC, self.thread_id
        )
    }

    /// Topic on which gossip messages are sent.
    ///
    /// Gossip messages are of type [`Request`][crate::messages::Request] with an empty
    /// response address.
    pub fn gossip_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, GOSSIP_TOPIC, self.thread_id
        )
    }

    /// The topic on which responses to replication-factor requests are sent.
    ///
    /// The messages sent on this topic are [`Response`][crate::messages::Response] messages.
    pub fn replication_response_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, REPLICATION_RESPONSE_TOPIC, self.thread_id
        )
    }

    /// Used to notify storage threads about replication factor changes.
    ///
    /// The messages sent on this topic are
    /// [`ReplicationFactorUpdate`][crate::messages::replication_factor::ReplicationFactorUpdate]
    /// messages.
    pub fn replication_change_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, REPLICATION_CHANGE_TOPIC, self.thread_id
        )
    }

    /// When nodes join the cluster, they send a [`Join`][crate::messages::Join] message on
    /// this topic to relevant nodes.
    pub fn node_join_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, NODE_JOIN_TOPIC, self.thread_id
        )
    }

    /// After a node departed the cluster, a [`Departed`][crate::messages::Departed] message is
    /// sent on this topic to relevant nodes.
    pub fn node_depart_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, NODE_DEPART_TOPIC, self.thread_id
        )
    }

    /// Topic for notifying a node thread that it itself should leave.
    ///
    /// The messages that are sent on this topic are
    /// [`SelfDepart`][crate::messages::SelfDepart] messages.
    pub fn self_depart_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, SELF_DEPART_TOPIC, self.thread_id
        )
    }
}

/// Provides the topic paths for addressing a specific thread of a specific _client_ node.
#[derive(Debug, Clone)]
pub struct ClientThread {
    /// The node ID of the client node.
    pub node_id: String,
    /// The ID of the addressed thread.
    pub thread_id: u32,
}

impl ClientThread {
    /// Address the given thread of the given client node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// The topic on which [`Response`][crate::messages::Response] messages should be sent in
    /// reply to requests.
    ///
    /// Clients send [`Request`][crate::messages::Request] messages to storage nodes and pass
    /// this topic as reply topic.
    pub fn response_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, USER_RESPONSE_TOPIC, self.thread_id
        )
    }
}

/// Provides the topic paths for addressing a specific thread of a specific _routing_ node.
///
/// The routing tier itself is not part of this crate; these topics describe the interfaces
/// that storage nodes consume from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingThread {
    /// The ID of the routing node.
    pub node_id: String,
    /// The addressed thread ID of the routing node.
    pub thread_id: u32,
}

impl RoutingThread {
    /// Addresses the given thread on the given routing node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// Storage node threads send a `"join"` request on this topic on startup.
    ///
    /// The routing node should reply with a
    /// [`ClusterInfo`][crate::messages::cluster_membership::ClusterInfo] message. Unlike most
    /// other messages in this crate, the `"join"` is sent as a zenoh `get` query with an
    /// immediate reply.
    pub fn seed_topic(prefix: &str) -> String {
        format!("{}/{}", prefix, SEED_TOPIC)
    }

    /// Used to notify routing threads of node joins and departures.
    ///
    /// The messages sent on this topic are of type [`Notify`][crate::messages::Notify].
    pub fn notify_topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, ROUTING_NOTIFY_TOPIC, self.thread_id
        )
    }
}
