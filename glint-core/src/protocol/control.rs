//! Control-channel messages: liveness, source switching, congestion
//! feedback, profile announcements, and disconnect.
//!
//! Timestamps are microseconds on the sender's session clock (elapsed
//! since session start). Clocks are never assumed synchronized: delay is
//! estimated from the heartbeat round trip, not from absolute times.

use serde::{Deserialize, Serialize};

use crate::capture::SourceId;
use crate::error::GlintError;
use crate::session::quality::QualityProfile;

// ── ControlMessage ───────────────────────────────────────────────

/// Messages exchanged on the reliable Control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Ask the host to switch the active capture source.
    SwitchSource { source: SourceId },

    /// Liveness ping.
    Heartbeat { timestamp_us: u64 },

    /// Reply to a heartbeat. `origin_timestamp_us` echoes the ping so
    /// the sender can compute the round trip.
    HeartbeatEcho {
        origin_timestamp_us: u64,
        receiver_timestamp_us: u64,
    },

    /// Viewer-measured network conditions, fed to the host's
    /// congestion controller.
    CongestionReport {
        /// Video-channel loss rate, per mille, since the last report.
        loss_permille: u32,
        /// One-way delay estimate in microseconds.
        delay_us: u64,
    },

    /// Host announcement that the quality profile changed.
    ProfileUpdate { profile: QualityProfile },

    /// Orderly teardown from either end.
    Disconnect { reason: DisconnectReason },
}

impl ControlMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, GlintError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── DisconnectReason ─────────────────────────────────────────────

/// Reason code carried in a `Disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Normal user-requested teardown.
    Normal,
    /// The session idled past its timeout.
    IdleTimeout,
    /// Too many packets failed authentication.
    TamperDetected,
    /// The peer violated the protocol.
    ProtocolError,
    /// The endpoint is shutting down.
    Shutdown,
}

// ── Ack ──────────────────────────────────────────────────────────

/// Cumulative delivery acknowledgement for a reliable channel.
///
/// Acks ride in unsequenced ACK-flagged frames so they are never
/// themselves acknowledged or retransmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Discriminant of the acknowledged channel.
    pub channel: u8,
    /// Every sequence up to and including this one has been delivered.
    pub through: u32,
}

impl Ack {
    pub fn to_bytes(&self) -> Result<Vec<u8>, GlintError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────
