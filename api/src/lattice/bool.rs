use super::Lattice;

/// [`Lattice`] implementation for [`bool`] values, using logical OR as the merge operation.
///
/// Once the stored value is `true` it can never go back to `false`, which makes this the
/// simplest monotone lattice. It is mainly used as a return type for query methods such as
/// [`MapLattice::contains_key`][super::MapLattice::contains_key].
#[derive(Clone, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct BoolLattice {
    element: bool,
}

impl BoolLattice {
    /// Constructs a new lattice from the given value.
    pub fn new(element: bool) -> Self {
        Self { element }
    }
}

impl Lattice for BoolLattice {
    type Element = bool;

    fn reveal(&self) -> &bool {
        &self.element
    }

    fn into_revealed(self) -> bool {
        self.element
    }

    fn assign(&mut self, element: Self::Element) {
        self.element = element;
    }

    fn merge_element(&mut self, element: &bool) {
        self.element |= element;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_or() {
        let mut bl = BoolLattice::default();
        assert_eq!(bl.reveal(), &false);
        bl.merge_element(&false);
        assert_eq!(bl.reveal(), &false);
        bl.merge_element(&true);
        assert_eq!(bl.reveal(), &true);
        bl.merge_element(&false);
        assert_eq!(bl.reveal(), &true);
    }

    #[test]
    fn assign() {
        let mut bl = BoolLattice::new(true);
        bl.assign(false);
        assert_eq!(bl.reveal(), &false);
    }
}
