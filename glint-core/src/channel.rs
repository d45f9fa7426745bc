//! Logical channels multiplexed over one session transport.
//!
//! Each channel owns an independent sequence space and a delivery policy:
//! Control and Input are reliable-ordered (retransmitted, bounded retries),
//! Video and Device are best-effort (reordered within a window, dropped
//! below it, never retransmitted).

use std::fmt;

use crate::error::GlintError;

// ── ChannelId ────────────────────────────────────────────────────

/// Identifies a logical stream within a session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Session control: handshake, heartbeats, source switching,
    /// profile updates, congestion reports, disconnect.
    Control = 0x0,
    /// Remote input events (viewer → host).
    Input = 0x1,
    /// Display capture stream (host → viewer).
    Video = 0x2,
    /// External capture-device stream (host → viewer).
    Device = 0x3,
}

impl ChannelId {
    /// All channels, in discriminant order.
    pub const ALL: [ChannelId; 4] = [
        ChannelId::Control,
        ChannelId::Input,
        ChannelId::Video,
        ChannelId::Device,
    ];

    /// The delivery guarantee this channel carries.
    pub const fn policy(self) -> DeliveryPolicy {
        match self {
            ChannelId::Control | ChannelId::Input => DeliveryPolicy::Reliable,
            ChannelId::Video | ChannelId::Device => DeliveryPolicy::BestEffort,
        }
    }

    /// Index into per-channel state tables.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = GlintError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(ChannelId::Control),
            0x1 => Ok(ChannelId::Input),
            0x2 => Ok(ChannelId::Video),
            0x3 => Ok(ChannelId::Device),
            _ => Err(GlintError::UnknownVariant {
                type_name: "ChannelId",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Control => write!(f, "Control"),
            ChannelId::Input => write!(f, "Input"),
            ChannelId::Video => write!(f, "Video"),
            ChannelId::Device => write!(f, "Device"),
        }
    }
}

// ── DeliveryPolicy ───────────────────────────────────────────────

/// How packets on a channel are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Ordered, acknowledged, retransmitted on timeout. A bounded retry
    /// count is enforced before the session is declared dead.
    Reliable,
    /// Unacknowledged. The receiver reorders within a small window and
    /// drops anything below the window's lower bound.
    BestEffort,
}

// ── Tests ────────────────────────────────────────────────────────
