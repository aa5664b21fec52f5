//! The reliability core of a peer channel: sequencing, acknowledgment, flow control and
//!  fragment reassembly for packets exchanged with a single peer over an unreliable datagram
//!  transport.
//!
//! ## Design goals
//!
//! * Each channel is an independent stream with its own sequence numbers, send window and
//!    receive window. A peer session multiplexes several channels.
//! * Reliable delivery: every data packet is resent (driven by the peer's retransmission
//!    timers) until the peer acknowledges it
//! * In-sequence delivery: packets are handed to the application strictly in the order they
//!    were enqueued by the sender, buffering out-of-order arrivals until gaps are filled
//! * Messages that do not fit into a single packet are split into a *fragment group* on the
//!    sending side and reassembled on the receiving side, delivered as a single packet
//! * Flow control: the sender does not start sending while more bytes are waiting for
//!    acknowledgment than the peer advertises as its window size
//! * The channel does no I/O and keeps no time. Socket access, serialization, encryption and
//!    timers belong to the peer that owns the channel, see [transport::PeerTransport]
//!
//! ## Packets
//!
//! A packet's header has a kind, a sequence number and a payload size. Fragments additionally
//!  carry a descriptor naming their group's first sequence number and the number of fragments
//!  in the group:
//!
//! ```ascii
//!  kind         sequence number   fragment descriptor      acknowledged by peer
//!  ACKNOWLEDGE  yes               -                        no
//!  RELIABLE     yes               -                        yes
//!  FRAGMENT     yes               (start, count)           yes
//!  UNSEQUENCED  own counter       -                        no, never windowed
//! ```
//!
//! ## Send and receive window
//!
//! Both windows have a fixed capacity of 256 packets, stored in a ring of slots indexed by
//!  sequence number modulo 256. Sequence numbers are assigned by the channel starting at 1 and
//!  increase strictly, i.e. there are no gaps. Running out of sequence numbers is reported as an
//!  error rather than wrapping around - at any realistic packet rate this takes many days, and
//!  the owning peer is expected to reset its session long before.
//!
//! The send window:
//!
//! ```ascii
//!  begin ..transmitted.. next_to_send ..queued, never sent.. end
//! ```
//!
//! The receive window:
//!
//! ```ascii
//!  begin ..received or missing.. end
//! ```
//!
//! Packets leave a window only at its start, so a missing packet blocks everything behind it.
//!
//! ## Errors
//!
//! Stale, duplicate, out-of-window and malformed input from the peer is normal protocol noise:
//!  it is logged and dropped, and reported through return values rather than errors. Errors
//!  are reserved for local misuse (e.g. enqueueing into a full window) and for broken internal
//!  invariants, which are reported as 'this is a bug'.
pub mod channel;
pub mod channel_item;
pub mod config;
pub mod incoming_window;
pub mod outgoing_window;
pub mod packet_header;
pub mod sequence_number;
pub mod transport;

mod slot_ring;
