use anyhow::Context;
use bytes::BytesMut;
use crate::packet_header::{FragmentDescriptor, PacketHeader, PacketKind};
use crate::sequence_number::SequenceNumber;

/// The unit stored in a channel's send and receive windows: a packet's header, its fragment
///  descriptor if it is part of a fragment group, its payload and some per-slot bookkeeping.
///
/// `T` is the handle of a retransmission timer that is owned by the surrounding timer
///  subsystem. The channel stores it with the packet and hands it back when the packet leaves
///  the send window, but it never looks inside.
#[derive(Debug)]
pub struct ChannelItem<T> {
    header: PacketHeader,
    fragment: Option<FragmentDescriptor>,
    payload: BytesMut,
    /// For outgoing packets, the number of times the packet was put on the wire. For incoming
    ///  packets, the number of copies that arrived *after* the first one.
    transmit_count: u32,
    ack_count: u32,
    retransmit_timer: Option<T>,
}

impl<T> ChannelItem<T> {
    /// Creates an outgoing packet. Its sequence number is assigned when it is enqueued in a
    ///  channel.
    pub fn new(kind: PacketKind, payload: impl Into<BytesMut>) -> anyhow::Result<ChannelItem<T>> {
        let payload = payload.into();
        let size = u32::try_from(payload.len())
            .with_context(|| format!("payload of {} bytes is too big for a single packet", payload.len()))?;

        Ok(ChannelItem {
            header: PacketHeader {
                kind,
                sequence_number: SequenceNumber::ZERO,
                size,
            },
            fragment: None,
            payload,
            transmit_count: 0,
            ack_count: 0,
            retransmit_timer: None,
        })
    }

    /// Wraps a packet that was decoded from the wire
    pub fn from_wire(header: PacketHeader, fragment: Option<FragmentDescriptor>, payload: impl Into<BytesMut>) -> ChannelItem<T> {
        ChannelItem {
            header,
            fragment,
            payload: payload.into(),
            transmit_count: 0,
            ack_count: 0,
            retransmit_timer: None,
        }
    }

    pub fn with_fragment(mut self, fragment: FragmentDescriptor) -> ChannelItem<T> {
        self.fragment = Some(fragment);
        self
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.header.sequence_number
    }

    pub fn size(&self) -> u32 {
        self.header.size
    }

    pub fn fragment(&self) -> Option<&FragmentDescriptor> {
        self.fragment.as_ref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> BytesMut {
        self.payload
    }

    pub fn transmit_count(&self) -> u32 {
        self.transmit_count
    }

    pub fn ack_count(&self) -> u32 {
        self.ack_count
    }

    pub fn is_acknowledged(&self) -> bool {
        self.ack_count > 0
    }

    pub fn retransmit_timer(&self) -> Option<&T> {
        self.retransmit_timer.as_ref()
    }

    /// returns the previously registered timer handle, if any
    pub fn set_retransmit_timer(&mut self, timer: T) -> Option<T> {
        self.retransmit_timer.replace(timer)
    }

    pub fn take_retransmit_timer(&mut self) -> Option<T> {
        self.retransmit_timer.take()
    }

    /// true if this packet starts a fragment group, i.e. its reassembly is anchored here
    pub(crate) fn is_fragment_group_start(&self) -> bool {
        self.header.kind == PacketKind::Fragment
            && self.fragment.is_some_and(|f| f.is_group_start(self.header.sequence_number))
    }

    pub(crate) fn assign_sequence_number(&mut self, sequence_number: SequenceNumber) {
        self.header.sequence_number = sequence_number;
    }

    pub(crate) fn record_transmission(&mut self) {
        self.transmit_count = self.transmit_count.saturating_add(1);
    }

    pub(crate) fn record_acknowledgment(&mut self) {
        self.ack_count = self.ack_count.saturating_add(1);
    }

    /// appends the payload of the next fragment in the group, updating the size to the
    ///  combined payload length
    pub(crate) fn append_fragment(&mut self, next: ChannelItem<T>) {
        self.payload.unsplit(next.payload);
        self.header.size = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
    }
}
