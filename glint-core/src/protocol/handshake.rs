//! Session handshake messages.
//!
//! # Wire Protocol
//!
//! ```text
//! Viewer ──[Connect{caps, source, public_key, resume?}]──► Host   (clear)
//! Host   ──[Challenge{public_key, nonce}]────────────────► Viewer (clear)
//!            both ends derive session keys here
//! Viewer ──[Response{auth_proof}]────────────────────────► Host   (sealed)
//! Host   ──[Accept{session_id, profile, source}]─────────► Viewer (sealed)
//!        or [Reject{reason}]
//! ```
//!
//! Each step is bounded by the configured handshake timeout; exceeding it
//! fails the attempt. A `Reject` is terminal and never auto-retried.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::SourceId;
use crate::crypto::CHALLENGE_NONCE_SIZE;
use crate::error::GlintError;
use crate::session::quality::QualityProfile;

/// Protocol version advertised in `Connect`.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Capabilities ─────────────────────────────────────────────────

/// Frame encodings a peer can produce or consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// Tile-delta encoding with zstd compression.
    TileDeltaZstd,
}

/// Capabilities advertised by the viewer in `Connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Protocol version.
    pub version: u32,
    /// Codecs the peer supports, in preference order.
    pub codecs: Vec<VideoCodec>,
    /// Whether the peer consumes Device-channel streams.
    pub device_streams: bool,
    /// Largest payload the peer will accept.
    pub max_payload: u64,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            codecs: vec![VideoCodec::TileDeltaZstd],
            device_streams: true,
            max_payload: crate::packet::MAX_PAYLOAD_SIZE as u64,
        }
    }
}

impl Capabilities {
    /// Intersect with the other end's capabilities.
    pub fn negotiate(&self, remote: &Self) -> Self {
        Self {
            version: self.version.min(remote.version),
            codecs: self
                .codecs
                .iter()
                .copied()
                .filter(|c| remote.codecs.contains(c))
                .collect(),
            device_streams: self.device_streams && remote.device_streams,
            max_payload: self.max_payload.min(remote.max_payload),
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────

/// Prior-session state offered when reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResumeHint {
    /// The session id being resumed.
    pub session_id: u64,
    /// The quality profile in effect when the transport dropped.
    pub profile: QualityProfile,
}

/// Viewer → host connection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connect {
    pub capabilities: Capabilities,
    /// The capture source the viewer wants to watch.
    pub requested_source: SourceId,
    /// Viewer's ephemeral X25519 public key.
    pub public_key: [u8; 32],
    /// Set when resuming a dropped session.
    pub resume: Option<ResumeHint>,
}

/// Host → viewer auth challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Host's ephemeral X25519 public key.
    pub public_key: [u8; 32],
    /// Nonce the viewer must prove its credential against.
    pub nonce: [u8; CHALLENGE_NONCE_SIZE],
}

/// Viewer → host credential proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub auth_proof: Vec<u8>,
}

/// Host → viewer session grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    pub session_id: u64,
    /// Initial quality profile.
    pub profile: QualityProfile,
    /// The source that will actually be streamed.
    pub source: SourceId,
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The auth proof did not verify.
    AuthFailed,
    /// The host cannot take another viewer right now.
    Busy,
    /// Protocol version mismatch.
    UnsupportedVersion,
    /// The requested capture source does not exist.
    UnknownSource,
    /// The resume hint named a session the host no longer knows.
    ResumeUnknown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AuthFailed => write!(f, "authentication failed"),
            RejectReason::Busy => write!(f, "host busy"),
            RejectReason::UnsupportedVersion => write!(f, "unsupported protocol version"),
            RejectReason::UnknownSource => write!(f, "unknown capture source"),
            RejectReason::ResumeUnknown => write!(f, "unknown resume session"),
        }
    }
}

/// All handshake messages, as one self-describing payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    Connect(Connect),
    Challenge(Challenge),
    Response(Response),
    Accept(Accept),
    Reject { reason: RejectReason },
}

impl HandshakeMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, GlintError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_roundtrip() {
        let msg = HandshakeMessage::Connect(Connect {
            capabilities: Capabilities::default(),
            requested_source: SourceId::Monitor(0),
            public_key: [7u8; 32],
            resume: Some(ResumeHint {
                session_id: 42,
                profile: QualityProfile::default(),
            }),
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(HandshakeMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn reject_roundtrip() {
        let msg = HandshakeMessage::Reject {
            reason: RejectReason::AuthFailed,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(HandshakeMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn negotiate_takes_intersection() {
        let local = Capabilities::default();
        let remote = Capabilities {
            device_streams: false,
            max_payload: 1024,
            ..Capabilities::default()
        };
        let negotiated = local.negotiate(&remote);
        assert!(!negotiated.device_streams);
        assert_eq!(negotiated.max_payload, 1024);
        assert_eq!(negotiated.codecs, vec![VideoCodec::TileDeltaZstd]);
    }

    #[test]
    fn garbage_rejected() {
        assert!(HandshakeMessage::from_bytes(&[0xFF; 3]).is_err());
    }
}
