//! Byte-level serializer adapters between wire payloads and stored lattice values.
//!
//! Every request and gossip tuple carries its value as a serialized payload
//! tagged with a [`LatticeType`]. A [`Serializer`] converts between these
//! payload bytes and the lattice values of one backend, performing the lattice
//! merge on every write. Two backends exist:
//!
//! - the [memory backend](memory::MemorySerializer) delegates to the thread's
//!   [`LatticeStore`],
//! - the [disk backend](disk) keeps one file per key under the thread's
//!   `ebs_<tid>` directory.
//!
//! A thread holds exactly one adapter per lattice type in its [`SerializerMap`]
//! and dispatches on the tagged type of each tuple.

use crate::{
    lattice::{
        causal::{MultiKeyCausalLattice, SingleKeyCausalLattice},
        Lattice, LastWriterWinsLattice, OrderedSetLattice, PriorityLattice, SetLattice,
    },
    store::{LatticeStore, LatticeValue},
    Key, LatticeType, MeldError,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{cell::RefCell, collections::HashMap, path::Path, rc::Rc};

pub mod disk;
pub mod memory;

/// Uniform byte-level access to the values of one lattice type.
///
/// `put` deserializes the payload, merges it into any existing stored value
/// according to the lattice merge law, and reports the new storage cost of
/// the key. `get` returns the serialized current value, mapping empty
/// carriers to [`MeldError::KeyDoesNotExist`].
pub trait Serializer {
    /// Returns the serialized value stored for the given key.
    fn get(&self, key: &Key) -> Result<Vec<u8>, MeldError>;

    /// Merges the given serialized value into the stored one.
    ///
    /// Returns the storage cost of the key after the merge, in bytes.
    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize, MeldError>;

    /// Drops the stored value for the given key.
    fn remove(&mut self, key: &Key);
}

/// Maps each [`LatticeType`] to the thread's serializer adapter for it.
pub type SerializerMap = HashMap<LatticeType, Box<dyn Serializer>>;

/// A lattice type that can appear as a tagged wire payload.
///
/// Connects the serde encoding of a lattice with its [`LatticeType`] tag and
/// its variant in the [`LatticeValue`] enum, so that the serializer backends
/// can be written once, generically over the lattice interface.
pub trait WireLattice: Lattice + Serialize + DeserializeOwned + Clone {
    /// The tag under which payloads of this lattice are sent.
    const TYPE: LatticeType;

    /// Wraps the lattice in the corresponding [`LatticeValue`] variant.
    fn into_value(self) -> LatticeValue;

    /// Borrows the lattice out of a [`LatticeValue`].
    ///
    /// Fails with [`MeldError::Lattice`] if the value is of a different variant.
    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError>;

    /// Returns `true` if the carrier is empty.
    ///
    /// Empty carriers are reported as [`MeldError::KeyDoesNotExist`] on reads.
    fn is_bottom(&self) -> bool;
}

impl WireLattice for LastWriterWinsLattice<Vec<u8>> {
    const TYPE: LatticeType = LatticeType::Lww;

    fn into_value(self) -> LatticeValue {
        LatticeValue::Lww(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_lww().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().value().is_empty()
    }
}

impl WireLattice for SetLattice<Vec<u8>> {
    const TYPE: LatticeType = LatticeType::Set;

    fn into_value(self) -> LatticeValue {
        LatticeValue::Set(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_set().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().is_empty()
    }
}

impl WireLattice for OrderedSetLattice<Vec<u8>> {
    const TYPE: LatticeType = LatticeType::OrderedSet;

    fn into_value(self) -> LatticeValue {
        LatticeValue::OrderedSet(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_ordered_set().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().is_empty()
    }
}

impl WireLattice for SingleKeyCausalLattice<SetLattice<Vec<u8>>> {
    const TYPE: LatticeType = LatticeType::SingleCausal;

    fn into_value(self) -> LatticeValue {
        LatticeValue::SingleCausal(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_single_causal().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().value.reveal().is_empty()
    }
}

impl WireLattice for MultiKeyCausalLattice<SetLattice<Vec<u8>>> {
    const TYPE: LatticeType = LatticeType::MultiCausal;

    fn into_value(self) -> LatticeValue {
        LatticeValue::MultiCausal(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_multi_causal().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().value.reveal().is_empty()
    }
}

impl WireLattice for PriorityLattice<f64, Vec<u8>> {
    const TYPE: LatticeType = LatticeType::Priority;

    fn into_value(self) -> LatticeValue {
        LatticeValue::Priority(self)
    }

    fn from_value(value: &LatticeValue) -> Result<&Self, MeldError> {
        value.as_priority().map_err(|_| MeldError::Lattice)
    }

    fn is_bottom(&self) -> bool {
        self.reveal().value.is_empty()
    }
}

/// Builds the serializer map for one storage thread.
///
/// Memory-tier threads get [`memory::MemorySerializer`] adapters that share
/// the given store; disk-tier threads get adapters operating on
/// `<ebs_root>/ebs_<thread_id>/`, which is created if it does not exist.
pub fn serializer_map(
    tier: crate::messages::Tier,
    store: &Rc<RefCell<LatticeStore<Key>>>,
    ebs_root: &Path,
    thread_id: u32,
) -> eyre::Result<SerializerMap> {
    use crate::messages::Tier;

    let mut serializers = SerializerMap::new();
    match tier {
        Tier::Memory => {
            serializers.insert(
                LatticeType::Lww,
                Box::new(memory::MemorySerializer::<LastWriterWinsLattice<Vec<u8>>>::new(
                    store.clone(),
                )) as Box<dyn Serializer>,
            );
            serializers.insert(
                LatticeType::Set,
                Box::new(memory::MemorySerializer::<SetLattice<Vec<u8>>>::new(
                    store.clone(),
                )),
            );
            serializers.insert(
                LatticeType::OrderedSet,
                Box::new(memory::MemorySerializer::<OrderedSetLattice<Vec<u8>>>::new(
                    store.clone(),
                )),
            );
            serializers.insert(
                LatticeType::SingleCausal,
                Box::new(memory::MemorySerializer::<
                    SingleKeyCausalLattice<SetLattice<Vec<u8>>>,
                >::new(store.clone())),
            );
            serializers.insert(
                LatticeType::MultiCausal,
                Box::new(memory::MemorySerializer::<
                    MultiKeyCausalLattice<SetLattice<Vec<u8>>>,
                >::new(store.clone())),
            );
            serializers.insert(
                LatticeType::Priority,
                Box::new(memory::MemorySerializer::<PriorityLattice<f64, Vec<u8>>>::new(
                    store.clone(),
                )),
            );
        }
        Tier::Disk => {
            let dir = disk::thread_dir(ebs_root, thread_id)?;
            serializers.insert(
                LatticeType::Lww,
                Box::new(disk::DiskLwwSerializer::new(dir.clone())) as Box<dyn Serializer>,
            );
            serializers.insert(
                LatticeType::Set,
                Box::new(disk::DiskSerializer::<SetLattice<Vec<u8>>>::new(dir.clone())),
            );
            serializers.insert(
                LatticeType::OrderedSet,
                Box::new(disk::DiskSerializer::<OrderedSetLattice<Vec<u8>>>::new(
                    dir.clone(),
                )),
            );
            serializers.insert(
                LatticeType::SingleCausal,
                Box::new(disk::DiskSerializer::<
                    SingleKeyCausalLattice<SetLattice<Vec<u8>>>,
                >::new(dir.clone())),
            );
            serializers.insert(
                LatticeType::MultiCausal,
                Box::new(disk::DiskSerializer::<
                    MultiKeyCausalLattice<SetLattice<Vec<u8>>>,
                >::new(dir.clone())),
            );
            serializers.insert(
                LatticeType::Priority,
                Box::new(disk::DiskPrioritySerializer::new(dir)),
            );
        }
        Tier::Routing => eyre::bail!("routing tier does not store data"),
    }
    Ok(serializers)
}
