use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::sequence_number::SequenceNumber;

/// The kind of a packet as declared in its header. The raw byte representation is what the
///  serialization layer puts on the wire.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketKind {
    /// Acknowledgment of a peer's packet. Acknowledgments are sequenced like everything else,
    ///  but they are never acknowledged themselves, so they may leave the send window as soon
    ///  as they were transmitted.
    Acknowledge = 1,
    /// Application data that fits into a single packet
    Reliable = 2,
    /// One part of a message that is split across several consecutive sequence numbers, see
    ///  [FragmentDescriptor]
    Fragment = 3,
    /// Data that bypasses the channel windows altogether: it is numbered from a separate
    ///  counter and never acknowledged or retransmitted
    Unsequenced = 4,
}

impl PacketKind {
    pub fn is_acknowledgment(&self) -> bool {
        *self == PacketKind::Acknowledge
    }

    /// true for packets that stay in the send window until the peer acknowledges them
    pub fn requires_acknowledgment(&self) -> bool {
        matches!(self, PacketKind::Reliable | PacketKind::Fragment)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub sequence_number: SequenceNumber,
    /// payload size in bytes, excluding the header. This is what flow control accounts for.
    pub size: u32,
}

/// Identifies the fragment group a [PacketKind::Fragment] packet belongs to: the group
///  occupies `count` consecutive sequence numbers starting at `start_sequence_number`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FragmentDescriptor {
    pub count: u32,
    pub start_sequence_number: SequenceNumber,
}

impl FragmentDescriptor {
    /// one past the group's last sequence number, or `None` if the group would exceed the
    ///  sequence number space
    pub fn end_sequence_number(&self) -> Option<SequenceNumber> {
        self.start_sequence_number.offset(self.count)
    }

    pub fn is_group_start(&self, sequence_number: SequenceNumber) -> bool {
        self.start_sequence_number == sequence_number
    }

    pub fn contains(&self, sequence_number: SequenceNumber) -> bool {
        match self.end_sequence_number() {
            Some(end) => self.start_sequence_number <= sequence_number && sequence_number < end,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::ack(1, Some(PacketKind::Acknowledge))]
    #[case::reliable(2, Some(PacketKind::Reliable))]
    #[case::fragment(3, Some(PacketKind::Fragment))]
    #[case::unsequenced(4, Some(PacketKind::Unsequenced))]
    #[case::zero(0, None)]
    #[case::unknown(99, None)]
    fn test_kind_from_raw(#[case] raw: u8, #[case] expected: Option<PacketKind>) {
        assert_eq!(PacketKind::try_from(raw).ok(), expected);
        if let Some(kind) = expected {
            assert_eq!(u8::from(kind), raw);
        }
    }

    #[rstest]
    #[case::ack(PacketKind::Acknowledge, false)]
    #[case::reliable(PacketKind::Reliable, true)]
    #[case::fragment(PacketKind::Fragment, true)]
    #[case::unsequenced(PacketKind::Unsequenced, false)]
    fn test_requires_acknowledgment(#[case] kind: PacketKind, #[case] expected: bool) {
        assert_eq!(kind.requires_acknowledgment(), expected);
    }

    #[rstest]
    #[case::before(4, false)]
    #[case::start(5, true)]
    #[case::middle(6, true)]
    #[case::last(7, true)]
    #[case::after(8, false)]
    fn test_fragment_contains(#[case] sn: u32, #[case] expected: bool) {
        let descriptor = FragmentDescriptor { count: 3, start_sequence_number: SequenceNumber::from_raw(5) };
        assert_eq!(descriptor.contains(SequenceNumber::from_raw(sn)), expected);
    }

    #[test]
    fn test_fragment_end_overflow() {
        let descriptor = FragmentDescriptor { count: 3, start_sequence_number: SequenceNumber::from_raw(u32::MAX - 1) };
        assert_eq!(descriptor.end_sequence_number(), None);
        assert!(!descriptor.contains(SequenceNumber::from_raw(u32::MAX)));
    }
}
