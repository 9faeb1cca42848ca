use super::{BoolLattice, Lattice, SetLattice};
use std::{borrow::Borrow, collections::HashMap, hash::Hash};

/// [`HashMap`]-based lattice that stores other lattice types as values.
///
/// The merge operation takes the union of the key sets of both maps. For keys that are present
/// in both maps, the two values are merged using their merge function. An absent key thus
/// behaves like the bottom element of the value lattice.
///
/// ## Example
///
/// ```
/// use meld_api::lattice::{Lattice, MapLattice, MaxLattice};
/// use std::collections::HashMap;
///
/// let mut map = HashMap::new();
/// map.insert("foo", MaxLattice::new(5));
/// map.insert("baz", MaxLattice::new(42));
/// let mut lattice = MapLattice::new(map);
///
/// let mut other = HashMap::new();
/// other.insert("foo", MaxLattice::new(2));
/// other.insert("bar", MaxLattice::new(16));
/// lattice.merge_element(&other);
///
/// // `bar` and `baz` appear in one map each, so they are taken over unchanged;
/// // `foo` is present in both maps, so the values are merged via `MaxLattice`
/// assert_eq!(lattice.reveal().get("bar"), Some(&MaxLattice::new(16)));
/// assert_eq!(lattice.reveal().get("baz"), Some(&MaxLattice::new(42)));
/// assert_eq!(lattice.reveal().get("foo"), Some(&MaxLattice::new(5)));
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MapLattice<K, V> {
    #[serde(bound = "
        K: Hash + Eq + serde::Serialize + for<'a> serde::Deserialize<'a>,
        V: serde::Serialize + for<'a> serde::Deserialize<'a>,
    ")]
    element: HashMap<K, V>,
}

impl<K, V> Lattice for MapLattice<K, V>
where
    K: Eq + Hash + Clone,
    V: Lattice + Clone,
{
    type Element = HashMap<K, V>;

    fn reveal(&self) -> &HashMap<K, V> {
        &self.element
    }

    fn into_revealed(self) -> HashMap<K, V> {
        self.element
    }

    fn assign(&mut self, element: Self::Element) {
        self.element = element;
    }

    fn merge_element(&mut self, elements: &HashMap<K, V>) {
        for (key, value) in elements {
            match self.element.entry(key.clone()) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(value.clone());
                }
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    entry.get_mut().merge(value);
                }
            };
        }
    }
}

impl<K, V> MapLattice<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new lattice from the given map.
    pub fn new(element: HashMap<K, V>) -> Self {
        Self { element }
    }

    /// Inserts the given value into the map, merging it with the previous value if any.
    ///
    /// If no value with the given key is in the map yet, the given value is inserted. If a
    /// previous value exists, the new value is merged into it (as defined by the value's
    /// [`Lattice`] implementation).
    pub fn insert(&mut self, key: K, value: V)
    where
        V: Lattice,
    {
        match self.element.entry(key) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&value);
            }
        };
    }

    /// Removes the value associated with the given key from the map.
    pub fn remove<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.element.remove(key);
    }

    /// Returns the set of keys present in this map as a [`SetLattice`].
    pub fn key_set(&self) -> SetLattice<K>
    where
        K: Clone,
    {
        SetLattice::new(self.element.keys().cloned().collect())
    }

    /// Returns `true` if the map contains a value for the given key.
    pub fn contains_key(&self, key: &K) -> BoolLattice {
        BoolLattice::new(self.element.contains_key(key))
    }
}

impl<K, V> Default for MapLattice<K, V> {
    fn default() -> Self {
        Self {
            element: Default::default(),
        }
    }
}

impl<K, V> PartialEq for MapLattice<K, V>
where
    K: Eq + Hash,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
    }
}

impl<K, V> Eq for MapLattice<K, V>
where
    K: Eq + Hash,
    V: PartialEq,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::MaxLattice;
    use std::collections::HashSet;

    fn sample() -> HashMap<char, MaxLattice<u64>> {
        [('a', MaxLattice::new(10)), ('b', MaxLattice::new(20))]
            .iter()
            .cloned()
            .collect()
    }

    #[test]
    fn merge_is_pointwise() {
        let map2: HashMap<_, _> = [('b', MaxLattice::new(30)), ('c', MaxLattice::new(40))]
            .iter()
            .cloned()
            .collect();
        let merged: HashMap<_, _> = [
            ('a', MaxLattice::new(10)),
            ('b', MaxLattice::new(30)),
            ('c', MaxLattice::new(40)),
        ]
        .iter()
        .cloned()
        .collect();

        let mut mapl = MapLattice::default();
        mapl.merge_element(&sample());
        assert_eq!(mapl.reveal(), &sample());

        mapl.merge(&MapLattice::new(map2));
        assert_eq!(mapl.reveal(), &merged);
    }

    #[test]
    fn insert_merges() {
        let mut mapl = MapLattice::new(sample());
        mapl.insert('a', MaxLattice::new(5));
        assert_eq!(mapl.reveal().get(&'a'), Some(&MaxLattice::new(10)));
        mapl.insert('a', MaxLattice::new(15));
        assert_eq!(mapl.reveal().get(&'a'), Some(&MaxLattice::new(15)));
    }

    #[test]
    fn key_set_and_contains() {
        let mut mapl = MapLattice::default();
        mapl.merge_element(&sample());

        assert_eq!(
            mapl.key_set().reveal(),
            &['a', 'b'].iter().copied().collect::<HashSet<_>>()
        );
        assert_eq!(mapl.contains_key(&'a').reveal(), &true);
        assert_eq!(mapl.contains_key(&'d').reveal(), &false);
    }
}
