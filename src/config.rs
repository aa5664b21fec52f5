use anyhow::bail;
use crate::sequence_number::WINDOW_CAPACITY;

pub struct ChannelConfig {
    /// This is the maximum payload per packet that the channel puts into a single packet when
    ///  splitting a message into fragments. It must leave room for the packet header, encryption
    ///  envelope etc. inside the UDP payload - the channel does not know about any of these and
    ///  leaves the responsibility with the application.
    pub fragment_payload_len: usize,

    /// The maximum number of fragments a single message can be split into. A fragment group is
    ///  reassembled inside the receive window, so it can never span more than the window's
    ///  capacity.
    ///
    /// Incoming fragments that claim a bigger group are dropped as malformed.
    pub max_fragment_count: u32,

    /// Upper limit for both outgoing messages and reassembled incoming messages
    pub max_message_size: u32,
}

impl ChannelConfig {
    /// Fragments that fit into a full Ethernet frame over IP V4 with some headroom for
    ///  headers and encryption
    pub fn default_ipv4() -> ChannelConfig {
        ChannelConfig {
            fragment_payload_len: 1400,
            max_fragment_count: 255,
            max_message_size: 255 * 1400,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fragment_payload_len == 0 {
            bail!("fragment payload length must be positive");
        }
        if self.max_fragment_count == 0 {
            bail!("max fragment count must be positive");
        }
        if self.max_fragment_count > WINDOW_CAPACITY {
            bail!("max fragment count {} exceeds the window capacity of {}", self.max_fragment_count, WINDOW_CAPACITY);
        }

        let max_fragmented_size = self.fragment_payload_len as u64 * self.max_fragment_count as u64;
        if self.max_message_size as u64 > max_fragmented_size {
            bail!("max message size {} can not be split into {} fragments of {} bytes", self.max_message_size, self.max_fragment_count, self.fragment_payload_len);
        }

        Ok(())
    }
}
