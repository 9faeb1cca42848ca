//! Handlers for the message kinds that a storage thread reacts to.

mod gossip;
mod node_depart;
mod node_join;
mod replication_change;
mod replication_response;
mod request;
mod self_depart;
