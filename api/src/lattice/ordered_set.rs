use super::{Lattice, MaxLattice};
use std::collections::BTreeSet;

/// Lattice implementation based on an ordered [`BTreeSet`] with the
/// [union operation](https://en.wikipedia.org/wiki/Union_(set_theory)) as merge operator.
///
/// Behaves like [`SetLattice`][super::SetLattice], but iterating the revealed set always
/// yields the elements in ascending order.
///
/// ## Example
///
/// ```
/// use meld_api::lattice::{Lattice, OrderedSetLattice};
/// use std::collections::BTreeSet;
///
/// let set: BTreeSet<_> = [144, 540, 156, 58].iter().copied().collect();
/// let mut lattice = OrderedSetLattice::new(set.clone());
/// assert_eq!(lattice.reveal().iter().copied().collect::<Vec<_>>(), vec![58, 144, 156, 540]);
///
/// let set_2: BTreeSet<_> = [8, 204, 156].iter().copied().collect();
/// lattice.merge_element(&set_2);
///
/// // the result is the ordered union of the two sets
/// assert_eq!(
///     lattice.reveal().iter().copied().collect::<Vec<_>>(),
///     vec![8, 58, 144, 156, 204, 540]
/// );
/// ```
#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OrderedSetLattice<T> {
    #[serde(bound = "T: Ord + serde::Serialize + for<'a> serde::Deserialize<'a>")]
    element: BTreeSet<T>,
}

impl<T> OrderedSetLattice<T> {
    /// Creates a new lattice based on the given set.
    pub fn new(element: BTreeSet<T>) -> Self {
        Self { element }
    }

    /// Returns the number of elements in this set.
    pub fn len(&self) -> MaxLattice<usize> {
        MaxLattice::new(self.element.len())
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.element.is_empty()
    }

    /// Returns an iterator that yields all items that are in both `self` and `other`.
    pub fn intersection<'a>(&'a self, other: &'a BTreeSet<T>) -> impl Iterator<Item = &'a T>
    where
        T: Ord,
    {
        self.element.intersection(other)
    }
}

impl<T> Lattice for OrderedSetLattice<T>
where
    T: Eq + Ord + Clone,
{
    type Element = BTreeSet<T>;

    fn reveal(&self) -> &BTreeSet<T> {
        &self.element
    }

    fn into_revealed(self) -> BTreeSet<T> {
        self.element
    }

    fn assign(&mut self, element: Self::Element) {
        self.element = element;
    }

    fn merge_element(&mut self, element: &BTreeSet<T>) {
        for val in element {
            if !self.element.contains(val) {
                self.element.insert(val.clone());
            }
        }
    }
}

impl<T> Default for OrderedSetLattice<T>
where
    T: Ord,
{
    fn default() -> Self {
        Self {
            element: Default::default(),
        }
    }
}
