use anyhow::bail;
use crate::channel_item::ChannelItem;
use crate::sequence_number::{SequenceNumber, WINDOW_CAPACITY};

/// Fixed-size circular storage for a window's packets, indexed by sequence number modulo
///  [WINDOW_CAPACITY].
///
/// NB: The ring does not know the window's bounds - it only guarantees that an index is never
///      silently shared: every access that expects a packet checks that the index is occupied
///      by exactly the requested sequence number.
pub(crate) struct SlotRing<T> {
    slots: Box<[Option<ChannelItem<T>>]>,
}

impl<T> SlotRing<T> {
    pub fn new() -> SlotRing<T> {
        SlotRing {
            slots: (0..WINDOW_CAPACITY).map(|_| None).collect(),
        }
    }

    /// whatever currently occupies the index of `sequence_number`, no matter which sequence
    ///  number it belongs to
    pub fn at_index_of(&self, sequence_number: SequenceNumber) -> Option<&ChannelItem<T>> {
        self.slots[sequence_number.slot_index()].as_ref()
    }

    pub fn at_index_of_mut(&mut self, sequence_number: SequenceNumber) -> Option<&mut ChannelItem<T>> {
        self.slots[sequence_number.slot_index()].as_mut()
    }

    /// the packet with the given sequence number, or `None` if its index is vacant or occupied
    ///  by a different sequence number
    pub fn get(&self, sequence_number: SequenceNumber) -> Option<&ChannelItem<T>> {
        self.at_index_of(sequence_number)
            .filter(|item| item.sequence_number() == sequence_number)
    }

    pub fn occupant(&self, sequence_number: SequenceNumber) -> anyhow::Result<&ChannelItem<T>> {
        match self.at_index_of(sequence_number) {
            None => bail!("this is a bug: slot for packet #{} is empty", sequence_number),
            Some(item) if item.sequence_number() != sequence_number => {
                bail!("this is a bug: slot for packet #{} is occupied by packet #{}", sequence_number, item.sequence_number())
            }
            Some(item) => Ok(item),
        }
    }

    pub fn occupant_mut(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<&mut ChannelItem<T>> {
        match self.at_index_of_mut(sequence_number) {
            None => bail!("this is a bug: slot for packet #{} is empty", sequence_number),
            Some(item) if item.sequence_number() != sequence_number => {
                bail!("this is a bug: slot for packet #{} is occupied by packet #{}", sequence_number, item.sequence_number())
            }
            Some(item) => Ok(item),
        }
    }

    pub fn insert(&mut self, item: ChannelItem<T>) -> anyhow::Result<()> {
        let slot = &mut self.slots[item.sequence_number().slot_index()];
        if let Some(existing) = slot {
            bail!("this is a bug: slot for packet #{} is still occupied by packet #{}", item.sequence_number(), existing.sequence_number());
        }
        *slot = Some(item);
        Ok(())
    }

    pub fn take(&mut self, sequence_number: SequenceNumber) -> anyhow::Result<ChannelItem<T>> {
        self.occupant(sequence_number)?;
        match self.slots[sequence_number.slot_index()].take() {
            Some(item) => Ok(item),
            None => bail!("this is a bug: slot for packet #{} is empty", sequence_number),
        }
    }

    #[cfg(test)]
    pub fn occupied_count(&self) -> usize {
        self.slots.iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_header::PacketKind;

    fn item(sn: u32) -> ChannelItem<()> {
        let mut item = ChannelItem::new(PacketKind::Reliable, &[sn as u8][..]).unwrap();
        item.assign_sequence_number(SequenceNumber::from_raw(sn));
        item
    }

    #[test]
    fn test_insert_take() {
        let mut ring = SlotRing::new();
        ring.insert(item(3)).unwrap();
        assert_eq!(ring.occupied_count(), 1);
        assert!(ring.get(SequenceNumber::from_raw(3)).is_some());
        assert!(ring.get(SequenceNumber::from_raw(3 + WINDOW_CAPACITY)).is_none());

        let taken = ring.take(SequenceNumber::from_raw(3)).unwrap();
        assert_eq!(taken.payload(), &[3]);
        assert_eq!(ring.occupied_count(), 0);
    }

    #[test]
    fn test_insert_into_occupied_slot() {
        let mut ring = SlotRing::new();
        ring.insert(item(3)).unwrap();
        assert!(ring.insert(item(3 + WINDOW_CAPACITY)).is_err());
        assert_eq!(ring.get(SequenceNumber::from_raw(3)).unwrap().payload(), &[3]);
    }

    #[test]
    fn test_occupant_mismatch() {
        let mut ring = SlotRing::new();
        ring.insert(item(3)).unwrap();

        assert!(ring.occupant(SequenceNumber::from_raw(3)).is_ok());
        assert!(ring.occupant(SequenceNumber::from_raw(4)).is_err());
        assert!(ring.occupant_mut(SequenceNumber::from_raw(3 + WINDOW_CAPACITY)).is_err());
        assert!(ring.take(SequenceNumber::from_raw(3 + WINDOW_CAPACITY)).is_err());
        assert_eq!(ring.occupied_count(), 1);
    }
}
