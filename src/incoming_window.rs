use std::sync::Arc;
use anyhow::bail;
use tracing::{debug, trace, warn};
use crate::channel_item::ChannelItem;
use crate::config::ChannelConfig;
use crate::packet_header::{FragmentDescriptor, PacketKind};
use crate::sequence_number::{SequenceNumber, WINDOW_CAPACITY};
use crate::slot_ring::SlotRing;

/// What happened to a packet handed to [IncomingWindow::receive]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Received {
    /// first arrival, stored for delivery
    Stored,
    /// a copy of this packet is already stored - the new copy was discarded
    Duplicate,
    /// the packet was delivered (or skipped) before
    Obsolete,
    /// the packet is too far ahead of the window to be stored
    BeyondWindow,
    /// the packet contradicts the protocol, e.g. an inconsistent fragment descriptor
    Malformed,
}

/// The receive side of a channel: packets from the peer that arrived but were not delivered
///  to the application yet.
///
/// ```ascii
///  begin ..received or missing.. end
/// ```
///
/// `begin` is the next packet to be delivered, `end` is one past the highest packet that
///  arrived so far. Delivery is strictly in sequence, and fragment groups are delivered as a
///  single reassembled packet once all their fragments arrived.
pub struct IncomingWindow<T> {
    channel_id: u8,
    config: Arc<ChannelConfig>,
    slots: SlotRing<T>,
    begin: SequenceNumber,
    end: SequenceNumber,
    received_count: u32,
}

enum SlideResult<T> {
    Delivered(ChannelItem<T>),
    NotReady,
    Discarded,
}

impl<T> IncomingWindow<T> {
    pub(crate) fn new(channel_id: u8, config: Arc<ChannelConfig>) -> IncomingWindow<T> {
        IncomingWindow {
            channel_id,
            config,
            slots: SlotRing::new(),
            begin: SequenceNumber::FIRST,
            end: SequenceNumber::FIRST,
            received_count: 0,
        }
    }

    pub fn begin(&self) -> SequenceNumber {
        self.begin
    }

    pub fn end(&self) -> SequenceNumber {
        self.end
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    fn contains(&self, sequence_number: SequenceNumber) -> bool {
        self.begin <= sequence_number && sequence_number < self.end
    }

    pub fn get(&self, sequence_number: SequenceNumber) -> Option<&ChannelItem<T>> {
        if !self.contains(sequence_number) {
            return None;
        }
        self.slots.get(sequence_number)
    }

    /// Stores a packet that arrived from the peer. Obsolete, duplicate and otherwise unusable
    ///  packets are dropped - they are normal protocol noise, so this is reported through
    ///  the result rather than as an error.
    pub fn receive(&mut self, item: ChannelItem<T>) -> anyhow::Result<Received> {
        let sequence_number = item.sequence_number();

        if sequence_number < self.begin {
            debug!("channel {}: received packet #{} below the receive window starting at #{} - dropping", self.channel_id, sequence_number, self.begin);
            return Ok(Received::Obsolete);
        }
        if sequence_number.distance_from(self.begin).unwrap_or(0) >= WINDOW_CAPACITY {
            debug!("channel {}: received packet #{} beyond the receive window starting at #{} - dropping", self.channel_id, sequence_number, self.begin);
            return Ok(Received::BeyondWindow);
        }

        match item.kind() {
            PacketKind::Unsequenced => {
                warn!("channel {}: unsequenced packet #{} passed to the receive window - dropping", self.channel_id, sequence_number);
                return Ok(Received::Malformed);
            }
            PacketKind::Fragment => {
                if let Some(rejection) = self.check_fragment(&item) {
                    return Ok(rejection);
                }
            }
            _ => {}
        }

        let Some(new_end) = sequence_number.offset(1) else {
            warn!("channel {}: received packet #{} at the end of the sequence number space - dropping", self.channel_id, sequence_number);
            return Ok(Received::Malformed);
        };

        if let Some(existing) = self.slots.at_index_of_mut(sequence_number) {
            if existing.sequence_number() != sequence_number {
                bail!("this is a bug: channel {}: slot for packet #{} inside the receive window is occupied by packet #{}", self.channel_id, sequence_number, existing.sequence_number());
            }
            existing.record_transmission();
            debug!("channel {}: received duplicate of packet #{} ({} duplicates so far) - dropping", self.channel_id, sequence_number, existing.transmit_count());
            return Ok(Received::Duplicate);
        }

        trace!("channel {}: storing packet #{} of kind {:?} with {} bytes", self.channel_id, sequence_number, item.kind(), item.size());
        self.slots.insert(item)?;
        self.received_count += 1;
        if self.end < new_end {
            self.end = new_end;
        }
        Ok(Received::Stored)
    }

    /// returns the reason for rejecting a fragment, or `None` if it is consistent
    fn check_fragment(&self, item: &ChannelItem<T>) -> Option<Received> {
        let sequence_number = item.sequence_number();

        let Some(fragment) = item.fragment() else {
            warn!("channel {}: fragment #{} has no fragment descriptor - dropping", self.channel_id, sequence_number);
            return Some(Received::Malformed);
        };
        if fragment.count == 0 || fragment.count > self.config.max_fragment_count {
            warn!("channel {}: fragment #{} claims a group of {} fragments, maximum is {} - dropping", self.channel_id, sequence_number, fragment.count, self.config.max_fragment_count);
            return Some(Received::Malformed);
        }
        if !fragment.contains(sequence_number) {
            warn!("channel {}: fragment #{} is outside its own group {:?} - dropping", self.channel_id, sequence_number, fragment);
            return Some(Received::Malformed);
        }
        if fragment.start_sequence_number < self.begin {
            debug!("channel {}: fragment #{} belongs to group starting at #{} which was already delivered - dropping", self.channel_id, sequence_number, fragment.start_sequence_number);
            return Some(Received::Obsolete);
        }
        None
    }

    /// Marks a received packet as ready for delivery, i.e. it passed the peer's validation and
    ///  acknowledgment handling. Sequence numbers outside the window are ignored.
    pub fn mark_for_delivery(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<()> {
        if !self.contains(sequence_number) {
            debug!("channel {}: marking packet #{} outside the receive window [{}, {}) - ignoring", self.channel_id, sequence_number, self.begin, self.end);
            return Ok(());
        }

        let item = self.slots.occupant_mut(sequence_number)?;
        item.record_acknowledgment();
        trace!("channel {}: packet #{} marked for delivery", self.channel_id, sequence_number);
        Ok(())
    }

    /// Takes the next deliverable packet out of the window: the packet at the window's start if
    ///  it is marked for delivery, or the reassembled message if it starts a complete fragment
    ///  group. Ownership goes to the caller.
    ///
    /// Delivers at most one packet per call - callers loop until `None` to drain the window.
    pub fn slide(&mut self) -> anyhow::Result<Option<ChannelItem<T>>> {
        loop {
            match self.try_slide_head()? {
                SlideResult::Delivered(item) => return Ok(Some(item)),
                SlideResult::NotReady => return Ok(None),
                SlideResult::Discarded => {
                    trace!("channel {}: discarded packet at the start of the receive window, retrying", self.channel_id);
                }
            }
        }
    }

    fn try_slide_head(&mut self) -> anyhow::Result<SlideResult<T>> {
        if self.is_empty() {
            return Ok(SlideResult::NotReady);
        }

        let head = match self.slots.at_index_of(self.begin) {
            None => return Ok(SlideResult::NotReady),
            Some(head) => head,
        };
        if head.sequence_number() != self.begin {
            bail!("this is a bug: channel {}: slot for packet #{} at the start of the receive window is occupied by packet #{}", self.channel_id, self.begin, head.sequence_number());
        }
        if !head.is_acknowledged() {
            return Ok(SlideResult::NotReady);
        }

        if head.kind() != PacketKind::Fragment {
            let item = self.remove_head(1)?;
            trace!("channel {}: delivering packet #{}", self.channel_id, item.sequence_number());
            return Ok(SlideResult::Delivered(item));
        }

        let head_fragment = head.fragment().copied()
            .filter(|_| head.is_fragment_group_start());
        let descriptor = match head_fragment {
            Some(descriptor) => descriptor,
            None => {
                warn!("channel {}: fragment #{} at the start of the receive window does not start a fragment group - discarding", self.channel_id, self.begin);
                self.remove_head(1)?;
                return Ok(SlideResult::Discarded);
            }
        };

        if !self.is_fragment_group_complete(&descriptor) {
            trace!("channel {}: fragment group {:?} is incomplete", self.channel_id, descriptor);
            return Ok(SlideResult::NotReady);
        }

        let message = self.remove_head(descriptor.count)?;
        if message.payload().len() > self.config.max_message_size as usize {
            warn!("channel {}: reassembled message starting at #{} has {} bytes, which exceeds the configured maximum of {} - discarding", self.channel_id, descriptor.start_sequence_number, message.payload().len(), self.config.max_message_size);
            return Ok(SlideResult::Discarded);
        }

        trace!("channel {}: delivering message reassembled from {} fragments starting at #{}", self.channel_id, descriptor.count, descriptor.start_sequence_number);
        Ok(SlideResult::Delivered(message))
    }

    /// The group's extent is defined by its head: members only need to name the same start.
    fn is_fragment_group_complete(&self, descriptor: &FragmentDescriptor) -> bool {
        (1..descriptor.count).all(|offset| {
            descriptor.start_sequence_number.offset(offset)
                .and_then(|sn| self.slots.get(sn))
                .is_some_and(|item| item.kind() == PacketKind::Fragment
                    && item.fragment().is_some_and(|f| f.start_sequence_number == descriptor.start_sequence_number))
        })
    }

    /// removes `count` packets from the start of the window, merging their payloads into the
    ///  first one
    fn remove_head(&mut self, count: u32) -> anyhow::Result<ChannelItem<T>> {
        let new_begin = self.begin.checked_add(count)?;

        let mut head = self.slots.take(self.begin)?;
        for sequence_number in self.begin.checked_next()?.to(new_begin) {
            let next = self.slots.take(sequence_number)?;
            head.append_fragment(next);
        }

        self.begin = new_begin;
        self.received_count -= count;
        Ok(head)
    }
}
