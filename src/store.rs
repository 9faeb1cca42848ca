//! A key value store implementation for lattice types.

use crate::{
    lattice::{
        causal::{MultiKeyCausalPayload, VectorClockValuePair},
        last_writer_wins::TimestampValuePair,
        priority::PriorityValuePair,
        Lattice, MapLattice, MaxLattice, OrderedSetLattice, SetLattice,
    },
    MeldError,
};
pub use meld_api::LatticeValue;
use std::{
    borrow::Borrow,
    collections::{hash_map, HashMap},
    hash::Hash,
    mem,
};

/// A key-value store for lattice values.
pub struct LatticeStore<K> {
    db: HashMap<K, LatticeValue>,
}

impl<K> LatticeStore<K>
where
    K: Hash + Eq,
{
    /// Gets the current value for the given key, if present.
    pub fn get<Q>(&self, key: &Q) -> Option<&LatticeValue>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.db.get(key)
    }

    /// Inserts or updates the store with the given key/value combination.
    ///
    /// If a value is already present for the key, the [`Lattice::merge`] operation
    /// is used to combine the old and the new value. This requires that the two values
    /// are of the same lattice type, i.e. the same variant of the [`LatticeValue`] enum.
    /// If this is not the case, a [`MeldError::Lattice`] is returned.
    ///
    /// Replaying any prefix of PUTs in any order yields the join of all their
    /// values, since merging is commutative, associative, and idempotent.
    pub fn put(&mut self, key: K, value: LatticeValue) -> Result<(), MeldError> {
        match self.db.entry(key) {
            hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
            hash_map::Entry::Occupied(mut entry) => entry.get_mut().try_merge(&value),
        }
    }

    /// Returns the estimated storage cost of the value stored for the given
    /// key, in bytes.
    ///
    /// Used for capacity accounting; returns `None` if the key is absent.
    pub fn size<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.db.get(key).map(|value| value.size_estimate())
    }

    /// Removes the given key from the store.
    pub fn remove<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.db.remove(key);
    }

    /// Returns an [`Iterator`] of all keys in the store.
    pub fn keys(&self) -> hash_map::Keys<K, LatticeValue> {
        self.db.keys()
    }

    /// Returns whether the store contains the given key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.db.contains_key(key)
    }

    /// An iterator visiting all stored key-value pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &LatticeValue)> {
        self.db.iter()
    }
}

impl<K> Default for LatticeStore<K> {
    fn default() -> Self {
        Self {
            db: Default::default(),
        }
    }
}

/// Estimates the size of a lattice to account for the storage consumption of stored values.
pub trait LatticeSizeEstimate {
    /// Returns an estimate of the size of the lattice, in bytes.
    fn size_estimate(&self) -> usize;
}

impl LatticeSizeEstimate for LatticeValue {
    fn size_estimate(&self) -> usize {
        match self {
            LatticeValue::Lww(lattice) => lattice.reveal().size_estimate(),
            LatticeValue::Set(lattice) => lattice.size_estimate(),
            LatticeValue::OrderedSet(lattice) => lattice.size_estimate(),
            LatticeValue::SingleCausal(lattice) => lattice.reveal().size_estimate(),
            LatticeValue::MultiCausal(lattice) => lattice.reveal().size_estimate(),
            LatticeValue::Priority(lattice) => lattice.reveal().size_estimate(),
        }
    }
}

impl LatticeSizeEstimate for TimestampValuePair<Vec<u8>> {
    fn size_estimate(&self) -> usize {
        self.value().len() + mem::size_of_val(&self.timestamp())
    }
}

impl LatticeSizeEstimate for SetLattice<Vec<u8>> {
    fn size_estimate(&self) -> usize {
        // the vector data lives in a separate heap allocation, so the stored
        // size is the hash-set slot plus the element bytes
        self.reveal()
            .iter()
            .map(|val| mem::size_of_val(val) + val.len())
            .sum()
    }
}

impl LatticeSizeEstimate for OrderedSetLattice<Vec<u8>> {
    fn size_estimate(&self) -> usize {
        self.reveal()
            .iter()
            .map(|val| mem::size_of_val(val) + val.len())
            .sum()
    }
}

impl<V> LatticeSizeEstimate for MapLattice<String, V>
where
    V: LatticeSizeEstimate + Lattice + Clone,
{
    fn size_estimate(&self) -> usize {
        self.reveal()
            .iter()
            .map(|(key, value)| key.len() + value.size_estimate())
            .sum()
    }
}

impl LatticeSizeEstimate for MaxLattice<usize> {
    fn size_estimate(&self) -> usize {
        mem::size_of::<usize>()
    }
}

impl LatticeSizeEstimate for VectorClockValuePair<SetLattice<Vec<u8>>> {
    fn size_estimate(&self) -> usize {
        self.vector_clock.size_estimate() + self.value.size_estimate()
    }
}

impl LatticeSizeEstimate for MultiKeyCausalPayload<SetLattice<Vec<u8>>> {
    fn size_estimate(&self) -> usize {
        let dep_size: usize = self
            .dependencies
            .reveal()
            .iter()
            .map(|(key, clock)| key.len() + clock.size_estimate())
            .sum();

        self.vector_clock.size_estimate() + dep_size + self.value.size_estimate()
    }
}

impl LatticeSizeEstimate for PriorityValuePair<f64, Vec<u8>> {
    fn size_estimate(&self) -> usize {
        mem::size_of::<f64>() + self.value.len()
    }
}
