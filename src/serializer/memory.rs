//! The memory backend: serializer adapters over the thread's [`LatticeStore`].

use super::{Serializer, WireLattice};
use crate::{store::LatticeStore, Key, MeldError};
use std::{cell::RefCell, marker::PhantomData, rc::Rc};

/// Serializer adapter for one lattice type, backed by the shared in-memory store.
///
/// All memory adapters of a thread share the same store; the per-type dispatch
/// happens through the [`SerializerMap`][super::SerializerMap]. The store is
/// only ever accessed from the owning thread's event loop, so the `RefCell`
/// borrows are never contended.
pub struct MemorySerializer<L> {
    store: Rc<RefCell<LatticeStore<Key>>>,
    _lattice: PhantomData<L>,
}

impl<L> MemorySerializer<L> {
    /// Creates a new adapter over the given store.
    pub fn new(store: Rc<RefCell<LatticeStore<Key>>>) -> Self {
        Self {
            store,
            _lattice: PhantomData,
        }
    }
}

impl<L> Serializer for MemorySerializer<L>
where
    L: WireLattice,
{
    fn get(&self, key: &Key) -> Result<Vec<u8>, MeldError> {
        let store = self.store.borrow();
        let value = store.get(key).ok_or(MeldError::KeyDoesNotExist)?;
        let lattice = L::from_value(value)?;
        if lattice.is_bottom() {
            return Err(MeldError::KeyDoesNotExist);
        }
        serde_json::to_vec(lattice).map_err(MeldError::from)
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize, MeldError> {
        let lattice: L = serde_json::from_slice(serialized)?;
        let mut store = self.store.borrow_mut();
        store.put(key.clone(), lattice.into_value())?;
        Ok(store.size(key).unwrap_or(0))
    }

    fn remove(&mut self, key: &Key) {
        self.store.borrow_mut().remove(key);
    }
}
