#![warn(missing_docs)]

//! Server-side core of `meld`, a distributed, multi-tier, eventually-consistent
//! key-value store.
//!
//! All conflict resolution is built from monotonic lattice merges (see the
//! [`lattice`] module re-exported from `meld-api`): a PUT never overwrites, it
//! merges, so replicas can apply updates in any order and still converge.
//!
//! The central type is the [storage node](nodes::StorageNode). Each node runs
//! one single-threaded event loop per configured storage thread. A thread owns
//! a disjoint shard of state (typed store, serializer map, replication cache,
//! pending work, changeset) and communicates with the rest of the cluster
//! exclusively through `zenoh` topics (see [`topics`]):
//!
//! - client GET/PUT requests are dispatched against the per-type
//!   [serializer adapters](serializer),
//! - mutations are collected in a local changeset and gossiped to replica
//!   peers every gossip period,
//! - per-key replication factors are fetched lazily through the metadata key
//!   space and cached,
//! - key placement is resolved through an injected
//!   [placement oracle](placement::PlacementOracle).
//!
//! Run a node with `cargo run --bin storage -- example-config.yml` (the
//! `SERVER_TYPE` environment variable selects the `memory` or `ebs` tier).

pub use meld_api::{lattice, ClientKey, LatticeType, MeldError};

use eyre::anyhow;
use messages::Tier;
use metadata::MetadataKey;

pub mod nodes;
pub use nodes::*;

pub mod config;
pub mod messages;
pub mod metadata;
pub mod placement;
pub mod serializer;
pub mod store;
pub mod topics;

/// List of all known storage [`Tier`]s (i.e. all tiers except `Routing`).
pub const ALL_TIERS: &[Tier] = &[Tier::Memory, Tier::Disk];

/// The default zenoh prefix under which all topics of a cluster live.
pub fn meld_default_zenoh_prefix() -> &'static str {
    "meld"
}

/// The key type used in the key-value store.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum Key {
    /// A key supplied by a client.
    Client(ClientKey),
    /// Used to store internal metadata.
    Metadata(MetadataKey),
}

impl Key {
    /// Returns `true` if this is a metadata key.
    pub fn is_metadata(&self) -> bool {
        matches!(self, Key::Metadata(_))
    }
}

impl std::fmt::Display for Key {
    /// Renders the canonical string form of the key.
    ///
    /// Client keys render as themselves; metadata keys use the reserved
    /// `MELD_METADATA|…` grammar (see [`metadata`]). The string form is also
    /// used as the per-key file name by the disk serializers.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Client(key) => std::fmt::Display::fmt(key, f),
            Key::Metadata(key) => std::fmt::Display::fmt(key, f),
        }
    }
}

impl From<MetadataKey> for Key {
    fn from(key: MetadataKey) -> Self {
        Self::Metadata(key)
    }
}

impl From<ClientKey> for Key {
    fn from(key: ClientKey) -> Self {
        Self::Client(key)
    }
}

impl<'a> From<&'a ClientKey> for Key {
    fn from(key: &'a ClientKey) -> Self {
        Self::Client(key.clone())
    }
}

impl std::convert::TryFrom<Key> for ClientKey {
    type Error = eyre::Error;

    fn try_from(value: Key) -> Result<Self, Self::Error> {
        match value {
            Key::Metadata(_) => Err(anyhow!("key is a metadata key instead of a client key")),
            Key::Client(key) => Ok(key),
        }
    }
}

/// Extension trait for reading zenoh payloads as UTF-8 strings.
pub trait ZenohValueAsString {
    /// Returns the payload as an owned string, failing on non-UTF-8 data.
    fn as_string(&self) -> eyre::Result<String>;
}

impl ZenohValueAsString for zenoh::prelude::Value {
    fn as_string(&self) -> eyre::Result<String> {
        String::from_utf8(self.payload.contiguous().into_owned())
            .map_err(|_| anyhow!("zenoh payload is not valid UTF-8"))
    }
}

/// Returns a zenoh session that is shared between all tests of this crate.
///
/// Opening a separate session per test would make the test suite very slow, so
/// all tests use this shared session with a unique, random topic prefix.
#[cfg(test)]
pub fn zenoh_test_instance() -> std::sync::Arc<zenoh::Session> {
    use once_cell::sync::OnceCell;
    use zenoh::prelude::ZFuture;

    static INSTANCE: OnceCell<std::sync::Arc<zenoh::Session>> = OnceCell::new();
    INSTANCE
        .get_or_init(|| {
            std::sync::Arc::new(
                zenoh::open(zenoh::config::Config::default())
                    .wait()
                    .expect("failed to open zenoh test session"),
            )
        })
        .clone()
}
