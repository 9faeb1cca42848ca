//! Contains the [`Lattice`] trait and its implementations.
//!
//! The following base lattices are available:
//!
//! - **[`BoolLattice`]:** A boolean value that uses the logical OR operation for merges.
//! - **[`MaxLattice`]:** Defines the merge operation as the maximum of the two values.
//! - **[`SetLattice`]** and **[`OrderedSetLattice`]**: A set of items that uses the union
//!     operator for merging.
//! - **[`LastWriterWinsLattice`]:** Keeps track of the creation time of each value and chooses
//!     the newer value on merging.
//! - **[`PriorityLattice`]:** Keeps the value with the numerically smallest priority.
//!
//! There are also compound lattices that can wrap other lattice values:
//!
//! - **[`MapLattice`]:** A hash map that stores lattice types. When merging two maps,
//!     conflicting values are resolved by applying their merge operator.
//!
//! By combining these lattice types, different levels of consistency can be achieved. For
//! example, the [`causal`] submodule contains lattice types to achieve causal consistency.

pub use self::{
    bool::BoolLattice, last_writer_wins::LastWriterWinsLattice, map::MapLattice, max::MaxLattice,
    ordered_set::OrderedSetLattice, priority::PriorityLattice, set::SetLattice,
};

pub mod causal;
pub mod last_writer_wins;
pub mod priority;

mod bool;
mod map;
mod max;
mod ordered_set;
mod set;

/// Abstraction for a [_bounded join semilattice_](https://en.wikipedia.org/wiki/Semilattice),
/// which is the foundation of the coordination freedom of the store.
///
/// A join semilattice is a set that has a unique supremum (least upper bound) operator `⊔`
/// for all pairs of values. The `⊔` operator must be
/// [commutative](https://en.wikipedia.org/wiki/Commutative),
/// [associative](https://en.wikipedia.org/wiki/Associative_property), and
/// [idempotent](https://en.wikipedia.org/wiki/Idempotence).
///
/// A common example for such a supremum operator `⊔` is the
/// [union operation](https://en.wikipedia.org/wiki/%E2%8B%83) `⋃` on sets.
///
/// The lattice properties are useful for a key value store since the supremum of a set of
/// values does not depend on the order they are merged together. Thus, we can merge key
/// updates in different orders across nodes and still reach the same end value on all of
/// them. This way, we can guarantee convergence across all replicas without any
/// synchronization.
///
/// Since the consistency of the key value store depends on the guarantees of this trait, **all
/// implementations must fulfill all the join semilattice properties**. Instead of implementing
/// this trait for new types, it is often possible to instead compose the existing types
/// that implement `Lattice` into more complex types.
pub trait Lattice {
    /// The type that is stored in this lattice.
    type Element;

    /// Returns the current value stored in the lattice.
    fn reveal(&self) -> &Self::Element;

    /// Returns the current value stored in the lattice, taking ownership.
    fn into_revealed(self) -> Self::Element;

    /// Assigns a new value to the lattice without any merging.
    fn assign(&mut self, element: Self::Element);

    /// Updates the lattice value with the supremum of the current and given values.
    ///
    /// This implements the supremum operator `⊔` described above.
    fn merge_element(&mut self, element: &Self::Element);

    /// Updates the lattice value with the supremum of the current and given values.
    ///
    /// This is a convenience method that reveals the value of `other` and then calls the
    /// [`merge_element`][Self::merge_element] method.
    fn merge(&mut self, other: &Self) {
        self.merge_element(other.reveal());
    }
}

#[cfg(test)]
mod laws {
    //! Randomized checks of the semilattice laws for all lattice types.
    //!
    //! For fuzzed triples `(a, b, c)` we check idempotence, commutativity,
    //! associativity, and monotonicity (`a ⊑ a ⊔ b`, i.e. merging `a` into
    //! `a ⊔ b` changes nothing).

    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use std::collections::{HashMap, HashSet};

    const ROUNDS: usize = 200;

    fn check_laws<L>(mut gen: impl FnMut(&mut SmallRng) -> L, seed: u64)
    where
        L: Lattice + Clone + PartialEq + std::fmt::Debug,
    {
        let mut rng = SmallRng::seed_from_u64(seed);
        for _ in 0..ROUNDS {
            let a = gen(&mut rng);
            let b = gen(&mut rng);
            let c = gen(&mut rng);

            // idempotence
            let mut aa = a.clone();
            aa.merge(&a);
            assert_eq!(aa, a);

            // commutativity
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            assert_eq!(ab, ba);

            // associativity
            let mut ab_c = ab.clone();
            ab_c.merge(&c);
            let mut bc = b.clone();
            bc.merge(&c);
            let mut a_bc = a.clone();
            a_bc.merge(&bc);
            assert_eq!(ab_c, a_bc);

            // monotonicity
            let mut ab_a = ab.clone();
            ab_a.merge(&a);
            assert_eq!(ab_a, ab);
        }
    }

    fn random_set(rng: &mut SmallRng) -> HashSet<Vec<u8>> {
        let len = rng.gen_range(0..5);
        (0..len).map(|_| vec![rng.gen_range(b'a'..b'f')]).collect()
    }

    #[test]
    fn bool_laws() {
        check_laws(|rng| BoolLattice::new(rng.gen()), 1);
    }

    #[test]
    fn max_laws() {
        check_laws(|rng| MaxLattice::new(rng.gen_range(0..1000u64)), 2);
    }

    #[test]
    fn set_laws() {
        check_laws(|rng| SetLattice::new(random_set(rng)), 3);
    }

    #[test]
    fn ordered_set_laws() {
        check_laws(
            |rng| {
                let len = rng.gen_range(0..5);
                OrderedSetLattice::new(
                    (0..len).map(|_| vec![rng.gen_range(b'a'..b'f')]).collect(),
                )
            },
            4,
        );
    }

    #[test]
    fn map_laws() {
        check_laws(
            |rng| {
                let len = rng.gen_range(0..4);
                let map: HashMap<String, MaxLattice<u64>> = (0..len)
                    .map(|_| {
                        (
                            (rng.gen_range(b'a'..b'e') as char).to_string(),
                            MaxLattice::new(rng.gen_range(0..100)),
                        )
                    })
                    .collect();
                MapLattice::new(map)
            },
            5,
        );
    }

    #[test]
    fn lww_laws() {
        use super::last_writer_wins::{Timestamp, TimestampValuePair};
        check_laws(
            |rng| {
                LastWriterWinsLattice::new(TimestampValuePair::new(
                    Timestamp::from_micros(rng.gen_range(0..20)),
                    vec![rng.gen_range(b'a'..b'f')],
                ))
            },
            6,
        );
    }

    #[test]
    fn priority_laws() {
        check_laws(
            |rng| {
                PriorityLattice::from_pair(
                    rng.gen_range(0..10) as f64,
                    vec![rng.gen_range(b'a'..b'f')],
                )
            },
            7,
        );
    }

    /// Generates a random vector clock over two client ids.
    fn random_clock(rng: &mut SmallRng) -> causal::VectorClock {
        let mut clock = causal::VectorClock::default();
        for id in &["A", "B"] {
            if rng.gen() {
                clock.insert((*id).to_string(), MaxLattice::new(rng.gen_range(1..4)));
            }
        }
        clock
    }

    /// Derives the value set from a clock as if every clock tick had inserted
    /// one element.
    ///
    /// This models a causally well-formed history: the value set of the join
    /// of two clocks is exactly the union of their value sets, so the
    /// dominance shortcuts of the causal lattices agree with plain set union.
    fn clock_history(clock: &causal::VectorClock) -> HashSet<Vec<u8>> {
        let mut values = HashSet::new();
        for (id, counter) in clock.reveal() {
            for n in 1..=*counter.reveal() {
                values.insert(format!("{}{}", id, n).into_bytes());
            }
        }
        values
    }

    #[test]
    fn single_key_causal_laws() {
        use super::causal::{SingleKeyCausalLattice, VectorClockValuePair};
        check_laws(
            |rng| {
                let clock = random_clock(rng);
                let value = SetLattice::new(clock_history(&clock));
                SingleKeyCausalLattice::new(VectorClockValuePair::new(clock, value))
            },
            8,
        );
    }

    #[test]
    fn multi_key_causal_laws() {
        use super::causal::{MultiKeyCausalLattice, MultiKeyCausalPayload};
        check_laws(
            |rng| {
                let clock = random_clock(rng);
                let value = SetLattice::new(clock_history(&clock));
                let mut dependencies = MapLattice::default();
                dependencies.insert(crate::ClientKey::from("dep"), clock.clone());
                MultiKeyCausalLattice::new(MultiKeyCausalPayload::new(
                    clock,
                    dependencies,
                    value,
                ))
            },
            9,
        );
    }
}
