//! Provides the [`PriorityLattice`], which keeps the value with the smallest priority.

use super::Lattice;

/// A lattice that keeps the element with the numerically smallest priority.
///
/// Unlike most other lattices in this module, the merge operation moves _down_ the number
/// line: merging keeps whichever pair has the smaller priority. This is useful for workloads
/// that track a minimum, e.g. the best bid seen so far.
///
/// If both priorities are equal, the smaller value wins, so the result does not depend on
/// the merge order.
///
/// ## Example
///
/// ```
/// use meld_api::lattice::{Lattice, PriorityLattice};
///
/// let mut lattice = PriorityLattice::from_pair(5.0, "b");
/// lattice.merge(&PriorityLattice::from_pair(2.0, "a"));
/// assert_eq!(lattice.reveal().value, "a");
///
/// // merging a pair with a higher priority changes nothing
/// lattice.merge(&PriorityLattice::from_pair(9.0, "c"));
/// assert_eq!(lattice.reveal().value, "a");
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PriorityLattice<P, T> {
    element: PriorityValuePair<P, T>,
}

impl<P, T> PriorityLattice<P, T> {
    /// Creates a new lattice from the given pair.
    pub fn new(element: PriorityValuePair<P, T>) -> Self {
        Self { element }
    }

    /// Convenience function to construct a lattice from a priority and a value.
    pub fn from_pair(priority: P, value: T) -> Self {
        Self::new(PriorityValuePair { priority, value })
    }
}

impl<P, T> Lattice for PriorityLattice<P, T>
where
    P: PartialOrd + Clone,
    T: Ord + Clone,
{
    type Element = PriorityValuePair<P, T>;

    fn reveal(&self) -> &PriorityValuePair<P, T> {
        &self.element
    }

    fn into_revealed(self) -> PriorityValuePair<P, T> {
        self.element
    }

    fn assign(&mut self, element: Self::Element) {
        self.element = element;
    }

    fn merge_element(&mut self, element: &PriorityValuePair<P, T>) {
        if element.priority < self.element.priority {
            self.element = element.clone();
        } else if element.priority == self.element.priority
            && element.value < self.element.value
        {
            // deterministic tie break on equal priorities
            self.element = element.clone();
        }
    }
}

/// The element type stored in a [`PriorityLattice`]. Pair of a priority and a value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[allow(missing_docs)]
pub struct PriorityValuePair<P, T> {
    pub priority: P,
    pub value: T,
}

impl<P, T> PriorityValuePair<P, T> {
    /// Constructs a new pair from the given priority and value.
    pub fn new(priority: P, value: T) -> Self {
        Self { priority, value }
    }
}
