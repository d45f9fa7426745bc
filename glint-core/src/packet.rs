//! The wire packet: header + sealed payload + authentication tag.

use std::fmt::Debug;

use crate::channel::ChannelId;
use crate::error::GlintError;
use crate::flags::PacketFlags;
use crate::header::{HEADER_SIZE, PacketHeader};

/// Maximum payload size per packet. Large enough for a compressed
/// full-resolution keyframe.
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Maximum total frame size the codec will accept.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + TAG_SIZE;

/// One framed unit on the wire.
///
/// `payload` is ciphertext for sealed packets and plaintext for
/// clear-text handshake frames (whose tag is all zeroes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl WirePacket {
    /// Build a packet, validating the payload size.
    pub fn new(
        channel: ChannelId,
        sequence: u32,
        flags: PacketFlags,
        payload: Vec<u8>,
        tag: [u8; TAG_SIZE],
    ) -> Result<Self, GlintError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(GlintError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            header: PacketHeader::new(channel, sequence, flags, payload.len() as u32),
            payload,
            tag,
        })
    }

    /// Build a clear-text handshake frame on the Control channel.
    pub fn handshake(sequence: u32, payload: Vec<u8>) -> Result<Self, GlintError> {
        Self::new(
            ChannelId::Control,
            sequence,
            PacketFlags::HANDSHAKE,
            payload,
            [0u8; TAG_SIZE],
        )
    }

    pub fn channel(&self) -> ChannelId {
        self.header.channel
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags
    }

    /// Total encoded size on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TAG_SIZE
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Deserialize from a complete wire frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        let header = PacketHeader::decode(bytes)?;
        let expected = HEADER_SIZE + header.payload_len as usize + TAG_SIZE;
        if bytes.len() != expected {
            return Err(GlintError::ProtocolViolation("packet length mismatch"));
        }
        if header.payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(GlintError::PayloadTooLarge {
                size: header.payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let payload_end = HEADER_SIZE + header.payload_len as usize;
        let payload = bytes[HEADER_SIZE..payload_end].to_vec();
        let tag: [u8; TAG_SIZE] = bytes[payload_end..]
            .try_into()
            .map_err(|_| GlintError::ProtocolViolation("auth tag truncated"))?;
        Ok(Self {
            header,
            payload,
            tag,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
