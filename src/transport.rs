#[cfg(test)] use mockall::automock;
use crate::packet_header::{FragmentDescriptor, PacketHeader};

/// This is the channel's view of the peer that owns it: the place where packets actually go
///  on the wire, and the source of the flow control budget. Introduced to keep socket I/O,
///  header serialization and encryption out of the channel (and to facilitate mocking them
///  away for testing).
#[cfg_attr(test, automock)]
pub trait PeerTransport {
    /// The peer's advertised receive window in bytes. The channel does not start sending
    ///  while more than this is in transit.
    fn advertised_window_size(&self) -> u32;

    /// Serializes and sends a packet.
    ///
    /// NB: Send errors are not reported back - the transport is expected to log them. The
    ///      packet stays in the send window and is retransmitted like any other lost packet.
    fn do_send(&self, header: PacketHeader, fragment: Option<FragmentDescriptor>, payload: &[u8]);
}
