use std::fmt::{Display, Formatter};
use anyhow::anyhow;

/// Number of slots in each of a channel's circular windows. A sequence number `sn` lives at
///  index `sn % WINDOW_CAPACITY`.
pub const WINDOW_CAPACITY: u32 = 256;

/// Position of a packet in a channel's sequenced stream.
///
/// Sequence numbers are linear: there is no wrap-around, and `0` is reserved for 'never
///  assigned'. A channel can therefore carry at most `u32::MAX - 1` sequenced packets before
///  the session has to be re-established.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SequenceNumber(u32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);
    /// the first sequence number that is ever assigned to a packet
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn checked_next(&self) -> anyhow::Result<SequenceNumber> {
        self.checked_add(1)
    }

    pub fn checked_add(&self, offset: u32) -> anyhow::Result<SequenceNumber> {
        self.0.checked_add(offset)
            .map(SequenceNumber)
            .ok_or_else(|| anyhow!("sequence number space exhausted: {} + {}", self.0, offset))
    }

    /// `self + offset` if that is still a valid sequence number
    pub fn offset(&self, offset: u32) -> Option<SequenceNumber> {
        self.0.checked_add(offset).map(SequenceNumber)
    }

    /// the number of sequence numbers in `[other, self)`, or `None` if `other` is after `self`
    pub fn distance_from(&self, other: SequenceNumber) -> Option<u32> {
        self.0.checked_sub(other.0)
    }

    pub fn slot_index(&self) -> usize {
        (self.0 % WINDOW_CAPACITY) as usize
    }

    /// all sequence numbers from `self` (inclusive) to `end` (exclusive)
    pub fn to(&self, end: SequenceNumber) -> impl Iterator<Item = SequenceNumber> {
        (self.0..end.0).map(SequenceNumber)
    }
}
