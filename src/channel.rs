use std::cmp::min;
use std::sync::Arc;
use anyhow::bail;
use bytes::BytesMut;
use tracing::{debug, trace};
use crate::channel_item::ChannelItem;
use crate::config::ChannelConfig;
use crate::incoming_window::{IncomingWindow, Received};
use crate::outgoing_window::OutgoingWindow;
use crate::packet_header::{FragmentDescriptor, PacketKind};
use crate::sequence_number::SequenceNumber;
use crate::transport::PeerTransport;

/// A snapshot of a channel's window positions and counters
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChannelStats {
    pub next_outgoing_sequence_number: SequenceNumber,
    pub outgoing_begin: SequenceNumber,
    pub outgoing_next_to_send: SequenceNumber,
    pub outgoing_end: SequenceNumber,
    pub outgoing_in_flight_count: u32,
    pub in_transit_bytes: u32,
    pub incoming_begin: SequenceNumber,
    pub incoming_end: SequenceNumber,
    pub incoming_received_count: u32,
}

/// One logical stream of a peer session, with its own sequence numbers and send and receive
///  windows.
///
/// The owning peer drives a channel from its processing loop:
/// * application data is enqueued ([Channel::enqueue], [Channel::enqueue_message])
/// * [Channel::do_send] puts newly enqueued packets on the wire as far as the flow control
///    budget allows
/// * acknowledgments from the peer go to [Channel::acknowledge], after which
///    [Channel::slide_outgoing] releases settled packets (and their retransmission timers)
/// * packets from the peer go to [Channel::receive] and [Channel::mark_for_delivery], after
///    which [Channel::slide_incoming] yields them for delivery in sequence
///
/// Retransmission timing is up to the peer: when a timer fires, it calls
///  [Channel::do_retransmit].
///
/// NB: A channel is not synchronized internally - it must be owned by a single processing loop
///      or guarded by a lock.
pub struct Channel<T> {
    channel_id: u8,
    config: Arc<ChannelConfig>,
    next_outgoing_sequence_number: SequenceNumber,
    next_unsequenced_number: u32,
    outgoing: OutgoingWindow<T>,
    incoming: IncomingWindow<T>,
}

impl<T> Channel<T> {
    pub fn new(channel_id: u8, config: Arc<ChannelConfig>) -> anyhow::Result<Channel<T>> {
        config.validate()?;

        Ok(Channel {
            channel_id,
            outgoing: OutgoingWindow::new(channel_id),
            incoming: IncomingWindow::new(channel_id, config.clone()),
            config,
            next_outgoing_sequence_number: SequenceNumber::FIRST,
            next_unsequenced_number: 1,
        })
    }

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// true if nothing was ever enqueued on this channel
    pub fn is_unused(&self) -> bool {
        self.next_outgoing_sequence_number == SequenceNumber::FIRST
    }

    pub fn outgoing(&self) -> &OutgoingWindow<T> {
        &self.outgoing
    }

    pub fn incoming(&self) -> &IncomingWindow<T> {
        &self.incoming
    }

    pub fn in_transit_bytes(&self) -> u32 {
        self.outgoing.in_transit_bytes()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            next_outgoing_sequence_number: self.next_outgoing_sequence_number,
            outgoing_begin: self.outgoing.begin(),
            outgoing_next_to_send: self.outgoing.next_to_send(),
            outgoing_end: self.outgoing.end(),
            outgoing_in_flight_count: self.outgoing.in_flight_count(),
            in_transit_bytes: self.outgoing.in_transit_bytes(),
            incoming_begin: self.incoming.begin(),
            incoming_end: self.incoming.end(),
            incoming_received_count: self.incoming.received_count(),
        }
    }

    /// Numbers for unsequenced packets come from their own counter. They never go through the
    ///  windows, so the counter wraps around (skipping 0) instead of running out.
    pub fn next_unsequenced_number(&mut self) -> u32 {
        let result = self.next_unsequenced_number;
        self.next_unsequenced_number = result.checked_add(1).unwrap_or(1);
        result
    }

    /// Assigns the next sequence number to a packet and stores it in the send window.
    ///
    /// Fails if the window is full: callers are expected to check [OutgoingWindow::is_full]
    ///  and hold back data until packets were released.
    pub fn enqueue(&mut self, mut item: ChannelItem<T>) -> anyhow::Result<SequenceNumber> {
        if item.kind() == PacketKind::Unsequenced {
            bail!("channel {}: unsequenced packets can not be enqueued in the send window", self.channel_id);
        }

        if self.outgoing.is_full() {
            bail!("channel {}: send window is full", self.channel_id);
        }

        let sequence_number = self.next_outgoing_sequence_number;
        let next = sequence_number.checked_next()?;

        item.assign_sequence_number(sequence_number);
        self.outgoing.push(item)?;

        self.next_outgoing_sequence_number = next;
        Ok(sequence_number)
    }

    /// Enqueues an application message, splitting it into a fragment group if it does not fit
    ///  into a single packet. Either all of the message's packets are enqueued or none.
    pub fn enqueue_message(&mut self, message: &[u8]) -> anyhow::Result<Vec<SequenceNumber>> {
        if message.len() > self.config.max_message_size as usize {
            bail!("channel {}: message of {} bytes exceeds the configured maximum of {}", self.channel_id, message.len(), self.config.max_message_size);
        }

        let fragment_len = self.config.fragment_payload_len;
        if message.len() <= fragment_len {
            let sequence_number = self.enqueue(ChannelItem::new(PacketKind::Reliable, message)?)?;
            return Ok(vec![sequence_number]);
        }

        let count = message.len().div_ceil(fragment_len);
        // NB: the message size limit keeps this within the configured max fragment count
        let count_u32 = u32::try_from(count)?;
        if count_u32 > self.outgoing.free_slots() {
            bail!("channel {}: message needs {} packets, but there are only {} free slots in the send window", self.channel_id, count, self.outgoing.free_slots());
        }

        let descriptor = FragmentDescriptor {
            count: count_u32,
            start_sequence_number: self.next_outgoing_sequence_number,
        };
        // ensure the whole group fits into the sequence number space before enqueueing anything
        descriptor.start_sequence_number.checked_add(count_u32)?;

        debug!("channel {}: splitting message of {} bytes into {} fragments starting at #{}", self.channel_id, message.len(), count, descriptor.start_sequence_number);

        let mut remaining = BytesMut::from(message);
        let mut result = Vec::with_capacity(count);
        while !remaining.is_empty() {
            let chunk = remaining.split_to(min(fragment_len, remaining.len()));
            let item = ChannelItem::new(PacketKind::Fragment, chunk)?
                .with_fragment(descriptor);
            result.push(self.enqueue(item)?);
        }
        Ok(result)
    }

    pub fn acknowledge(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<()> {
        self.outgoing.acknowledge(sequence_number)
    }

    pub fn slide_outgoing(&mut self) -> anyhow::Result<Option<ChannelItem<T>>> {
        self.outgoing.slide()
    }

    pub fn next_for_transmission(&mut self) -> anyhow::Result<Option<&mut ChannelItem<T>>> {
        self.outgoing.next_for_transmission()
    }

    /// Access to a packet in the send window, e.g. for registering its retransmission timer
    pub fn outgoing_item_mut(&mut self, sequence_number: SequenceNumber) -> Option<&mut ChannelItem<T>> {
        self.outgoing.get_mut(sequence_number)
    }

    pub fn receive(&mut self, item: ChannelItem<T>) -> anyhow::Result<Received> {
        self.incoming.receive(item)
    }

    pub fn mark_for_delivery(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<()> {
        self.incoming.mark_for_delivery(sequence_number)
    }

    pub fn slide_incoming(&mut self) -> anyhow::Result<Option<ChannelItem<T>>> {
        self.incoming.slide()
    }

    /// Transmits all packets that were enqueued but never sent, unless the bytes in transit
    ///  already exceed the peer's advertised window. Returns the sequence numbers of the
    ///  transmitted packets so the caller can start their retransmission timers.
    ///
    /// NB: The budget is checked once per call rather than per packet, so a single call may
    ///      overshoot the advertised window. This is accepted in favor of never starving
    ///      packets that are bigger than the remaining budget.
    pub fn do_send(&mut self, transport: &dyn PeerTransport) -> anyhow::Result<Vec<SequenceNumber>> {
        let window_size = transport.advertised_window_size();
        if self.outgoing.in_transit_bytes() > window_size {
            debug!("channel {}: {} bytes in transit exceed the peer's window of {} bytes - not sending", self.channel_id, self.outgoing.in_transit_bytes(), window_size);
            return Ok(Vec::new());
        }

        let mut sent = Vec::new();
        while let Some(item) = self.outgoing.next_for_transmission()? {
            transport.do_send(*item.header(), item.fragment().copied(), item.payload());
            sent.push(item.sequence_number());
        }

        if !sent.is_empty() {
            trace!("channel {}: sent {} packets, {} bytes in transit", self.channel_id, sent.len(), self.outgoing.in_transit_bytes());
        }
        Ok(sent)
    }

    /// Resends a packet that is still waiting for its acknowledgment. Returns `false` if the
    ///  packet does not need resending (any more).
    pub fn do_retransmit(&mut self, sequence_number: SequenceNumber, transport: &dyn PeerTransport) -> anyhow::Result<bool> {
        match self.outgoing.retransmit(sequence_number)? {
            Some(item) => {
                transport.do_send(*item.header(), item.fragment().copied(), item.payload());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
