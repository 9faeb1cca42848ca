//! Defines the message types that are sent between nodes and threads.
//!
//! All messages are serialized with `serde_json` and published on the zenoh
//! topics defined in [`topics`][crate::topics].

pub use self::{
    depart::{Departed, SelfDepart},
    join::Join,
    notify::Notify,
    request::Request,
    response::Response,
};

mod depart;
mod join;
mod notify;

pub mod cluster_membership;
pub mod key_data;
pub mod replication_factor;
pub mod request;
pub mod response;
pub mod stats;

/// An enum representing all the tiers the system supports -- currently, a
/// memory tier and a disk-based tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Tier {
    /// The value for the memory tier.
    Memory,
    /// The value for the disk-based tier.
    Disk,
    /// The value for the routing tier.
    Routing,
}
