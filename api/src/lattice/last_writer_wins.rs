//! Provides the [`LastWriterWinsLattice`] and related timestamp types.

use super::Lattice;
use chrono::TimeZone;

/// A lattice where later writes overwrite earlier ones.
///
/// Keeps a [`Timestamp`] for the value. On merge, the value is overwritten
/// only if the timestamp of the other value is newer. By using this type, we can ensure
/// that writes to a key exhibit a total ordering, which results in _"read committed"_
/// consistency.
///
/// If two values carry the same timestamp, the larger value wins. The rule is arbitrary,
/// but it is deterministic, so all replicas converge to the same state no matter in which
/// order the values arrive.
///
/// ## Example
///
/// ```
/// use meld_api::lattice::{
///     Lattice, LastWriterWinsLattice,
///     last_writer_wins::{Timestamp, TimestampValuePair},
/// };
///
/// // initialize a new Lww lattice with the current time
/// let mut lattice = LastWriterWinsLattice::from_pair(Timestamp::now(), 42);
/// assert_eq!(lattice.reveal().value(), &42);
///
/// // create two new values, keeping track of their creation time
/// let value_1 = TimestampValuePair::new(Timestamp::now(), 100);
/// let value_2 = TimestampValuePair::new(Timestamp::now(), 50);
/// assert!(value_1.timestamp() < value_2.timestamp());
///
/// // merging `value_2` overwrites the value since `value_2` was created later than the
/// // original value
/// lattice.merge_element(&value_2);
/// assert_eq!(lattice.reveal().value(), &50);
///
/// // merging `value_1` afterwards does not change anything since `value_1` was created
/// // before `value_2`
/// lattice.merge_element(&value_1);
/// assert_eq!(lattice.reveal().value(), &50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LastWriterWinsLattice<T> {
    element: TimestampValuePair<T>,
}

impl<T> LastWriterWinsLattice<T> {
    /// Creates a new lattice from the given value.
    pub fn new(element: TimestampValuePair<T>) -> Self {
        Self { element }
    }

    /// Creates a new lattice from the given value, using the current time as timestamp.
    pub fn new_now(value: T) -> Self {
        Self::from_pair(Timestamp::now(), value)
    }

    /// Convenience function to construct a lattice from a timestamp and a value.
    pub fn from_pair(timestamp: Timestamp, value: T) -> Self {
        Self::new(TimestampValuePair::new(timestamp, value))
    }

    /// Get a reference to the wrapped [`TimestampValuePair`].
    pub fn element(&self) -> &TimestampValuePair<T> {
        &self.element
    }
}

impl<T> Lattice for LastWriterWinsLattice<T>
where
    T: Ord + Clone + std::fmt::Debug,
{
    type Element = TimestampValuePair<T>;

    fn reveal(&self) -> &TimestampValuePair<T> {
        &self.element
    }

    fn into_revealed(self) -> TimestampValuePair<T> {
        self.element
    }

    fn assign(&mut self, element: Self::Element) {
        self.element = element;
    }

    fn merge_element(&mut self, element: &TimestampValuePair<T>) {
        if element.timestamp > self.element.timestamp {
            self.element = element.clone();
        } else if element.timestamp == self.element.timestamp
            && element.value > self.element.value
        {
            // deterministic tie break, so replicas converge on concurrent
            // writes with identical timestamps
            self.element = element.clone();
        }
    }
}

/// The element type stored in a [`LastWriterWinsLattice`]. Pair of a [`Timestamp`] and a value.
#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimestampValuePair<T> {
    timestamp: Timestamp,
    value: T,
}

impl<T> TimestampValuePair<T> {
    /// Constructs a new pair from the given timestamp and value.
    pub fn new(timestamp: Timestamp, value: T) -> Self {
        Self { timestamp, value }
    }

    /// Returns the stored timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns a reference to the wrapped value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the wrapped value, taking ownership.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// The UTC timestamp used for keeping track of value creation times.
///
/// Used to determine which value is the newest for [`LastWriterWinsLattice`] instances.
///
/// Depends on the system time reported by the operating system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Timestamp(chrono::DateTime<chrono::Utc>);

impl Timestamp {
    /// Returns an UTC timestamp corresponding to the current date and time.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Creates a timestamp from the given number of microseconds since the UNIX epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(chrono::Utc.timestamp_nanos(micros * 1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_timestamp_wins() {
        let mut lattice = LastWriterWinsLattice::from_pair(Timestamp::from_micros(5), b"a".to_vec());
        lattice.merge(&LastWriterWinsLattice::from_pair(
            Timestamp::from_micros(3),
            b"b".to_vec(),
        ));
        assert_eq!(lattice.reveal().value(), &b"a".to_vec());

        lattice.merge(&LastWriterWinsLattice::from_pair(
            Timestamp::from_micros(8),
            b"c".to_vec(),
        ));
        assert_eq!(lattice.reveal().value(), &b"c".to_vec());
    }

    #[test]
    fn equal_timestamps_tie_break_deterministically() {
        let ts = Timestamp::from_micros(7);
        let mut left = LastWriterWinsLattice::from_pair(ts, b"a".to_vec());
        let mut right = LastWriterWinsLattice::from_pair(ts, b"b".to_vec());

        let l = left.clone();
        let r = right.clone();
        left.merge(&r);
        right.merge(&l);

        assert_eq!(left, right);
        assert_eq!(left.reveal().value(), &b"b".to_vec());
    }

    #[test]
    fn serde_round_trip() {
        let lattice = LastWriterWinsLattice::from_pair(Timestamp::now(), b"payload".to_vec());
        let serialized = serde_json::to_vec(&lattice).unwrap();
        let parsed: LastWriterWinsLattice<Vec<u8>> = serde_json::from_slice(&serialized).unwrap();
        assert_eq!(parsed, lattice);
    }
}
