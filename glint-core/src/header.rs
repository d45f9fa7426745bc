//! Fixed-size wire header prepended to every packet.
//!
//! Layout (10 bytes, little-endian):
//!
//! ```text
//! channel:      u8   (1)
//! sequence:     u32  (4)
//! flags:        u8   (1)
//! payload_len:  u32  (4)
//! ```
//!
//! The header is transmitted in the clear but is bound to the payload as
//! associated data of the AEAD seal, so tampering with any field fails
//! authentication.

use crate::channel::ChannelId;
use crate::error::GlintError;
use crate::flags::PacketFlags;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 10;

/// Raw header bytes.
pub type HeaderBytes = [u8; HEADER_SIZE];

/// The per-packet wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Target logical channel.
    pub channel: ChannelId,
    /// Per-channel sequence number. `0` only for unsequenced ACK frames.
    pub sequence: u32,
    /// Packet flags.
    pub flags: PacketFlags,
    /// Payload length in bytes (ciphertext, excluding the auth tag).
    pub payload_len: u32,
}

impl PacketHeader {
    pub fn new(channel: ChannelId, sequence: u32, flags: PacketFlags, payload_len: u32) -> Self {
        Self {
            channel,
            sequence,
            flags,
            payload_len,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> HeaderBytes {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.channel as u8;
        buf[1..5].copy_from_slice(&self.sequence.to_le_bytes());
        buf[5] = self.flags.bits();
        buf[6..10].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Deserialize from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, GlintError> {
        if bytes.len() < HEADER_SIZE {
            return Err(GlintError::InvalidHeader("header truncated"));
        }
        let channel = ChannelId::try_from(bytes[0])?;
        let sequence = u32::from_le_bytes(
            bytes[1..5]
                .try_into()
                .map_err(|_| GlintError::InvalidHeader("sequence"))?,
        );
        let flags = PacketFlags::from_bits(bytes[5])
            .ok_or(GlintError::InvalidHeader("unknown flag bits"))?;
        let payload_len = u32::from_le_bytes(
            bytes[6..10]
                .try_into()
                .map_err(|_| GlintError::InvalidHeader("payload_len"))?,
        );
        Ok(Self {
            channel,
            sequence,
            flags,
            payload_len,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
