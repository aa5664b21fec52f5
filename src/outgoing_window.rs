use anyhow::bail;
use tracing::{debug, trace};
use crate::channel_item::ChannelItem;
use crate::sequence_number::{SequenceNumber, WINDOW_CAPACITY};
use crate::slot_ring::SlotRing;

/// The send side of a channel: all locally enqueued packets that were not yet released.
///
/// ```ascii
///  begin ..transmitted.. next_to_send ..queued, never sent.. end
/// ```
///
/// A packet leaves the window (see [OutgoingWindow::slide]) once it was transmitted and, unless
///  it is an acknowledgment itself, acknowledged by the peer - and only if all packets before it
///  have left the window.
pub struct OutgoingWindow<T> {
    channel_id: u8,
    slots: SlotRing<T>,
    /// the oldest packet that was not released yet
    begin: SequenceNumber,
    /// the next packet to be transmitted for the first time
    next_to_send: SequenceNumber,
    /// one past the newest enqueued packet
    end: SequenceNumber,
    in_flight_count: u32,
    /// sum of the sizes of all packets that were sent and are waiting for an acknowledgment
    in_transit_bytes: u32,
}

impl<T> OutgoingWindow<T> {
    pub(crate) fn new(channel_id: u8) -> OutgoingWindow<T> {
        OutgoingWindow {
            channel_id,
            slots: SlotRing::new(),
            begin: SequenceNumber::FIRST,
            next_to_send: SequenceNumber::FIRST,
            end: SequenceNumber::FIRST,
            in_flight_count: 0,
            in_transit_bytes: 0,
        }
    }

    pub fn begin(&self) -> SequenceNumber {
        self.begin
    }

    pub fn next_to_send(&self) -> SequenceNumber {
        self.next_to_send
    }

    pub fn end(&self) -> SequenceNumber {
        self.end
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight_count
    }

    pub fn in_transit_bytes(&self) -> u32 {
        self.in_transit_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn free_slots(&self) -> u32 {
        WINDOW_CAPACITY - self.end.distance_from(self.begin).unwrap_or(0).min(WINDOW_CAPACITY)
    }

    pub fn is_full(&self) -> bool {
        self.free_slots() == 0
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

    /// NB: This is meant for attaching retransmission timers and similar bookkeeping. Changing
    ///      a packet's header through other means than the window's operations is not supported.
    pub fn get_mut(&mut self, sequence_number: SequenceNumber) -> Option<&mut ChannelItem<T>> {
        if !self.contains(sequence_number) {
            return None;
        }
        self.slots.at_index_of_mut(sequence_number)
            .filter(|item| item.sequence_number() == sequence_number)
    }

    /// Sequence numbers of all packets that were transmitted and are still waiting for the
    ///  peer's acknowledgment, i.e. the packets a retransmission timer should be running for
    pub fn unacknowledged(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.begin.to(self.next_to_send)
            .filter(move |&sn| self.slots.get(sn)
                .is_some_and(|item| item.kind().requires_acknowledgment() && !item.is_acknowledged())
            )
    }

    /// Stores a packet that already has its sequence number assigned. Packets must be pushed
    ///  strictly in sequence without gaps, and only while there is room in the window.
    pub(crate) fn push(&mut self, item: ChannelItem<T>) -> anyhow::Result<()> {
        let sequence_number = item.sequence_number();
        if sequence_number != self.end {
            bail!("this is a bug: channel {}: packet #{} enqueued out of sequence, expected #{}", self.channel_id, sequence_number, self.end);
        }
        let new_end = sequence_number.checked_next()?;

        trace!("channel {}: enqueuing packet #{} of kind {:?} with {} bytes", self.channel_id, sequence_number, item.kind(), item.size());
        self.slots.insert(item)?;

        self.end = new_end;
        self.in_flight_count += 1;
        Ok(())
    }

    /// Registers the peer's acknowledgment of a packet.
    ///
    /// Acknowledgments for packets outside the window or for packets that were never sent are
    ///  ignored: they are stale, duplicated or malformed, and none of these are errors.
    ///
    /// NB: The packet's bytes are released from the in-transit budget on its first
    ///      acknowledgment only - duplicates increase the ack counter but nothing else.
    /// NB: An acknowledgment for a packet that was enqueued but never sent is ignored as well,
    ///      since its bytes were never added to the budget.
    pub fn acknowledge(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<()> {
        if !self.contains(sequence_number) {
            debug!("channel {}: acknowledgment for packet #{} outside the send window [{}, {}) - ignoring", self.channel_id, sequence_number, self.begin, self.end);
            return Ok(());
        }
        if sequence_number >= self.next_to_send {
            debug!("channel {}: acknowledgment for packet #{} that was never sent - ignoring", self.channel_id, sequence_number);
            return Ok(());
        }

        let item = self.slots.occupant_mut(sequence_number)?;
        let is_first_ack = !item.is_acknowledged();
        item.record_acknowledgment();

        if is_first_ack && item.kind().requires_acknowledgment() {
            self.in_transit_bytes = self.in_transit_bytes.saturating_sub(item.size());
        }
        trace!("channel {}: packet #{} acknowledged ({} times), {} bytes in transit", self.channel_id, sequence_number, item.ack_count(), self.in_transit_bytes);
        Ok(())
    }

    /// Releases the packet at the start of the window if it is settled, i.e. transmitted and,
    ///  unless it is an acknowledgment, acknowledged. Ownership of the released packet goes to
    ///  the caller, who typically cancels its retransmission timer.
    ///
    /// Releases at most one packet per call - callers loop until `None` to drain the window.
    pub fn slide(&mut self) -> anyhow::Result<Option<ChannelItem<T>>> {
        if self.is_empty() {
            return Ok(None);
        }

        let head = self.slots.occupant(self.begin)?;
        if head.transmit_count() == 0 {
            return Ok(None);
        }
        if !head.kind().is_acknowledgment() && !head.is_acknowledged() {
            return Ok(None);
        }

        let new_begin = self.begin.checked_next()?;
        let item = self.slots.take(self.begin)?;
        trace!("channel {}: releasing packet #{} of kind {:?}, transmitted {} times, acknowledged {} times", self.channel_id, item.sequence_number(), item.kind(), item.transmit_count(), item.ack_count());

        self.begin = new_begin;
        self.in_flight_count -= 1;
        Ok(Some(item))
    }

    /// Yields the next packet for its *first* transmission, if any, and accounts for it as
    ///  being on the wire. Retransmissions go through [OutgoingWindow::retransmit] instead.
    ///
    /// NB: Acknowledgment packets are not added to the in-transit bytes because the peer never
    ///      acknowledges them, so nothing would ever release their share of the budget.
    pub fn next_for_transmission(&mut self) -> anyhow::Result<Option<&mut ChannelItem<T>>> {
        let sequence_number = self.next_to_send;
        if sequence_number >= self.end {
            return Ok(None);
        }
        let new_next_to_send = sequence_number.checked_next()?;

        let item = self.slots.occupant_mut(sequence_number)?;
        if item.is_acknowledged() && !item.kind().is_acknowledgment() {
            bail!("this is a bug: channel {}: packet #{} is acknowledged before its first transmission", self.channel_id, sequence_number);
        }

        item.record_transmission();
        // acknowledgments are never acknowledged, so they can not hold on to the budget
        if item.kind().requires_acknowledgment() {
            self.in_transit_bytes = self.in_transit_bytes.saturating_add(item.size());
        }
        self.next_to_send = new_next_to_send;

        trace!("channel {}: transmitting packet #{}, {} bytes in transit", self.channel_id, sequence_number, self.in_transit_bytes);
        Ok(Some(item))
    }

    /// Yields a packet for retransmission if it was sent before and is still waiting for an
    ///  acknowledgment. Its bytes are already part of the in-transit budget, so only the
    ///  transmission counter changes.
    pub fn retransmit(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<Option<&mut ChannelItem<T>>> {
        if sequence_number < self.begin || sequence_number >= self.next_to_send {
            debug!("channel {}: packet #{} is not eligible for retransmission - window is [{}, {}), next to send is #{}", self.channel_id, sequence_number, self.begin, self.end, self.next_to_send);
            return Ok(None);
        }

        let item = self.slots.occupant_mut(sequence_number)?;
        if !item.kind().requires_acknowledgment() || item.is_acknowledged() {
            return Ok(None);
        }

        item.record_transmission();
        trace!("channel {}: retransmitting packet #{} (transmission #{})", self.channel_id, sequence_number, item.transmit_count());
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_header::PacketKind;
    use rstest::rstest;

    fn window_with(kinds_and_sizes: &[(PacketKind, usize)]) -> OutgoingWindow<()> {
        let mut window = OutgoingWindow::new(3);
        for &(kind, size) in kinds_and_sizes {
            let mut item = ChannelItem::new(kind, vec![0u8; size].as_slice()).unwrap();
            item.assign_sequence_number(window.end());
            window.push(item).unwrap();
        }
        window
    }

    fn sn(raw: u32) -> SequenceNumber {
        SequenceNumber::from_raw(raw)
    }

    fn transmit_all(window: &mut OutgoingWindow<()>) {
        while window.next_for_transmission().unwrap().is_some() {}
    }

    #[test]
    fn test_push_in_sequence() {
        let window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20)]);
        assert_eq!(window.begin(), sn(1));
        assert_eq!(window.next_to_send(), sn(1));
        assert_eq!(window.end(), sn(3));
        assert_eq!(window.in_flight_count(), 2);
        assert_eq!(window.in_transit_bytes(), 0);
        assert_eq!(window.free_slots(), WINDOW_CAPACITY - 2);
    }

    #[rstest]
    #[case::gap(3)]
    #[case::repeated(1)]
    #[case::unassigned(0)]
    fn test_push_out_of_sequence(#[case] raw: u32) {
        let mut window = window_with(&[(PacketKind::Reliable, 10)]);
        let mut item = ChannelItem::new(PacketKind::Reliable, &b"x"[..]).unwrap();
        item.assign_sequence_number(sn(raw));

        assert!(window.push(item).is_err());
        assert_eq!(window.end(), sn(2));
        assert_eq!(window.in_flight_count(), 1);
    }

    #[test]
    fn test_push_into_full_window() {
        let mut window = window_with(&vec![(PacketKind::Reliable, 1); WINDOW_CAPACITY as usize]);
        assert!(window.is_full());

        let mut item = ChannelItem::new(PacketKind::Reliable, &b"x"[..]).unwrap();
        item.assign_sequence_number(window.end());
        assert!(window.push(item).is_err());
        assert_eq!(window.in_flight_count(), WINDOW_CAPACITY);
    }

    #[test]
    fn test_next_for_transmission_in_order() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20), (PacketKind::Reliable, 30)]);

        let mut transmitted = Vec::new();
        while let Some(item) = window.next_for_transmission().unwrap() {
            assert_eq!(item.transmit_count(), 1);
            transmitted.push(item.sequence_number().to_raw());
        }

        assert_eq!(transmitted, vec![1, 2, 3]);
        assert_eq!(window.in_transit_bytes(), 60);
        assert_eq!(window.next_to_send(), sn(4));
        assert!(window.next_for_transmission().unwrap().is_none());
    }

    #[test]
    fn test_acknowledgment_kind_is_not_in_transit() {
        let mut window = window_with(&[(PacketKind::Acknowledge, 8), (PacketKind::Reliable, 10)]);
        transmit_all(&mut window);
        assert_eq!(window.in_transit_bytes(), 10);

        // an acknowledgment leaves the window without being acknowledged
        let released = window.slide().unwrap().unwrap();
        assert_eq!(released.kind(), PacketKind::Acknowledge);
        assert!(window.slide().unwrap().is_none());
    }

    #[rstest]
    #[case::below_window(0)]
    #[case::window_end(4)]
    #[case::far_above(1000)]
    fn test_acknowledge_outside_window(#[case] raw: u32) {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20), (PacketKind::Reliable, 30)]);
        transmit_all(&mut window);

        window.acknowledge(sn(raw)).unwrap();

        assert_eq!(window.in_transit_bytes(), 60);
        assert!((1..4).all(|raw| !window.get(sn(raw)).unwrap().is_acknowledged()));
    }

    #[test]
    fn test_acknowledge_unsent() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20)]);
        window.next_for_transmission().unwrap();

        window.acknowledge(sn(2)).unwrap();

        assert_eq!(window.get(sn(2)).unwrap().ack_count(), 0);
        assert_eq!(window.in_transit_bytes(), 10);
        // the packet can still be sent
        assert!(window.next_for_transmission().unwrap().is_some());
        assert_eq!(window.in_transit_bytes(), 30);
    }

    #[test]
    fn test_duplicate_acknowledge_releases_budget_once() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20)]);
        transmit_all(&mut window);

        window.acknowledge(sn(1)).unwrap();
        window.acknowledge(sn(1)).unwrap();
        window.acknowledge(sn(1)).unwrap();

        assert_eq!(window.get(sn(1)).unwrap().ack_count(), 3);
        assert_eq!(window.in_transit_bytes(), 20);
    }

    #[test]
    fn test_slide_waits_for_head() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20), (PacketKind::Reliable, 30)]);
        transmit_all(&mut window);

        window.acknowledge(sn(2)).unwrap();
        assert!(window.slide().unwrap().is_none());
        assert_eq!(window.begin(), sn(1));

        window.acknowledge(sn(1)).unwrap();
        assert_eq!(window.slide().unwrap().unwrap().sequence_number(), sn(1));
        assert_eq!(window.slide().unwrap().unwrap().sequence_number(), sn(2));
        assert!(window.slide().unwrap().is_none());

        assert_eq!(window.begin(), sn(3));
        assert_eq!(window.in_flight_count(), 1);
        assert_eq!(window.in_transit_bytes(), 30);
    }

    #[test]
    fn test_slide_requires_transmission() {
        let mut window = window_with(&[(PacketKind::Acknowledge, 5)]);
        assert!(window.slide().unwrap().is_none());

        transmit_all(&mut window);
        assert!(window.slide().unwrap().is_some());
        assert!(window.is_empty());
    }

    #[test]
    fn test_slide_frees_slot_for_reuse() {
        let mut window = window_with(&vec![(PacketKind::Reliable, 1); WINDOW_CAPACITY as usize]);
        transmit_all(&mut window);
        window.acknowledge(sn(1)).unwrap();
        window.slide().unwrap().unwrap();

        let mut item = ChannelItem::new(PacketKind::Reliable, &b"x"[..]).unwrap();
        item.assign_sequence_number(window.end());
        window.push(item).unwrap();

        assert_eq!(window.end(), sn(WINDOW_CAPACITY + 2));
        assert!(window.get(sn(WINDOW_CAPACITY + 1)).is_some());
        assert!(window.get(sn(1)).is_none());
    }

    #[test]
    fn test_retransmit() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Reliable, 20), (PacketKind::Reliable, 30)]);
        window.next_for_transmission().unwrap();
        window.next_for_transmission().unwrap();
        window.acknowledge(sn(1)).unwrap();

        // acknowledged
        assert!(window.retransmit(sn(1)).unwrap().is_none());
        // never sent
        assert!(window.retransmit(sn(3)).unwrap().is_none());

        let item = window.retransmit(sn(2)).unwrap().unwrap();
        assert_eq!(item.transmit_count(), 2);
        assert_eq!(window.in_transit_bytes(), 20);
        assert_eq!(window.next_to_send(), sn(3));
    }

    #[test]
    fn test_unacknowledged() {
        let mut window = window_with(&[(PacketKind::Reliable, 10), (PacketKind::Acknowledge, 4), (PacketKind::Fragment, 30), (PacketKind::Reliable, 5)]);
        transmit_all(&mut window);
        window.acknowledge(sn(1)).unwrap();

        let pending = window.unacknowledged().map(|sn| sn.to_raw()).collect::<Vec<_>>();
        assert_eq!(pending, vec![3, 4]);
    }
}
