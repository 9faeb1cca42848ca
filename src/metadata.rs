//! Provides the [`MetadataKey`] type that can be used to address thread or key-specific
//! metadata.
//!
//! Also contains the [`TierMetadata`] and [`KeyProperty`] structs.
//!
//! Metadata lives in the same key space as client data: a metadata key is any
//! key whose canonical string form begins with the reserved
//! [`METADATA_IDENTIFIER`] followed by the [`METADATA_DELIMITER`]. Replication
//! metadata keys encode the client key they describe; the other kinds encode
//! the owning storage thread and its tier.

use crate::{messages::Tier, placement::tier_name, topics::StorageThread, ClientKey, Key};
use eyre::anyhow;

/// Reserved first segment of all metadata keys.
pub const METADATA_IDENTIFIER: &str = "MELD_METADATA";

/// Separates the segments of a metadata key.
pub const METADATA_DELIMITER: char = '|';

/// Used to request and update metadata between nodes.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum MetadataKey {
    /// Key under which the replication factors of a [`ClientKey`] are stored.
    Replication {
        /// The client key whose replication is requested/updated.
        key: ClientKey,
    },
    /// Statistics about a single storage thread are stored under this key.
    Thread {
        /// The tier that the thread's node belongs to.
        tier: Tier,
        /// The storage thread that the metadata is about.
        thread: StorageThread,
        /// The kind of metadata that is requested/updated.
        kind: ThreadMetadataKind,
    },
}

impl std::fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = METADATA_DELIMITER;
        match self {
            MetadataKey::Replication { key } => {
                write!(f, "{}{}replication{}{}", METADATA_IDENTIFIER, d, d, key)
            }
            MetadataKey::Thread { tier, thread, kind } => write!(
                f,
                "{}{}{}{}{}{}{}{}{}",
                METADATA_IDENTIFIER,
                d,
                kind.name(),
                d,
                thread.node_id,
                d,
                thread.thread_id,
                d,
                tier_name(*tier),
            ),
        }
    }
}

impl std::convert::TryFrom<Key> for MetadataKey {
    type Error = eyre::Error;

    fn try_from(value: Key) -> Result<Self, Self::Error> {
        match value {
            Key::Client(_) => Err(anyhow!("key is a client key instead of a metadata key")),
            Key::Metadata(key) => Ok(key),
        }
    }
}

/// Describes the kind of metadata that is stored about a storage thread.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum ThreadMetadataKind {
    /// Utilization statistics of the thread
    /// ([`ServerThreadStatistics`][crate::messages::stats::ServerThreadStatistics]).
    Stats,
    /// Access frequencies of the keys stored on the thread
    /// ([`KeyAccessData`][crate::messages::key_data::KeyAccessData]).
    KeyAccess,
    /// Sizes of the keys stored on the thread
    /// ([`KeySizeData`][crate::messages::key_data::KeySizeData]).
    KeySize,
}

impl ThreadMetadataKind {
    /// The name of the kind as it appears in the key grammar.
    fn name(&self) -> &'static str {
        match self {
            ThreadMetadataKind::Stats => "stats",
            ThreadMetadataKind::KeyAccess => "access",
            ThreadMetadataKind::KeySize => "size",
        }
    }
}

/// Describes per-[`Tier`] metadata.
#[derive(Debug, Clone)]
pub struct TierMetadata {
    /// The number of threads configured for the tier.
    pub thread_number: u32,
    /// The default replication factor configured for the tier.
    pub default_replication: usize,
    /// The configured capacity of nodes of this tier, in bytes.
    pub node_capacity: u64,
}

/// Properties tracked for every key stored on a thread.
///
/// Created on the first successful PUT for the key. The lattice type is fixed
/// from then on; PUTs that declare a different type are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProperty {
    /// The storage cost of the key in bytes, as reported by the serializer on
    /// the last write.
    pub size: usize,
    /// The lattice type of the stored value.
    pub lattice_type: crate::LatticeType,
}
