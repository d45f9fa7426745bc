//! Domain-specific error types for the glint engine.
//!
//! All fallible operations return `Result<T, GlintError>`.
//! No panics on invalid input — every error is typed, and the recoverable
//! ones (capture timeouts, encoder faults, injection failures) are handled
//! inside the stage that produced them.

use std::time::Duration;
use thiserror::Error;

use crate::channel::ChannelId;
use crate::protocol::handshake::RejectReason;

/// The canonical error type for the glint engine.
#[derive(Debug, Error)]
pub enum GlintError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A field in the wire header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The protocol version offered by the peer is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// A packet or message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Capture Errors ───────────────────────────────────────────
    /// The frame source produced nothing within its deadline.
    /// Recoverable: the pipeline repeats the previous frame.
    #[error("capture timed out after {0:?}")]
    CaptureTimeout(Duration),

    /// The requested capture source does not exist or cannot be opened.
    #[error("capture source unavailable: {0}")]
    SourceUnavailable(String),

    // ── Encoder Errors ───────────────────────────────────────────
    /// The encoder faulted on a frame. Recoverable: the pipeline resets
    /// the encoder state and forces a keyframe.
    #[error("encoder fault: {0}")]
    EncodeFault(String),

    // ── Handshake Errors ─────────────────────────────────────────
    /// A handshake step exceeded its bounded timeout. Terminal for the
    /// attempt; never auto-retried.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer rejected the handshake. Terminal for the attempt.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(RejectReason),

    // ── Transport Errors ─────────────────────────────────────────
    /// The underlying stream reported an I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport link dropped (peer gone, missed heartbeats).
    #[error("transport disconnected")]
    TransportDisconnect,

    /// An internal hand-off channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A reliable-channel packet exhausted its retransmission budget.
    #[error("retries exhausted on {channel} channel at sequence {sequence}")]
    RetriesExhausted { channel: ChannelId, sequence: u32 },

    // ── Crypto Errors ────────────────────────────────────────────
    /// A packet failed authenticated decryption. The packet is dropped
    /// without processing; repeated failures terminate the session.
    #[error("packet authentication failed")]
    AuthenticationFailure,

    /// Key exchange or cipher setup failed.
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    // ── Input Errors ─────────────────────────────────────────────
    /// An input event could not be injected. Logged and skipped.
    #[error("input injection failed: {0}")]
    InjectionFailure(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration document could not be parsed or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl GlintError {
    /// Returns `true` for errors a pipeline stage absorbs locally
    /// instead of surfacing as a session-level failure.
    pub fn is_stage_recoverable(&self) -> bool {
        matches!(
            self,
            GlintError::CaptureTimeout(_)
                | GlintError::EncodeFault(_)
                | GlintError::InjectionFailure(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GlintError {
    fn from(s: String) -> Self {
        GlintError::Other(s)
    }
}

impl From<&str> for GlintError {
    fn from(s: &str) -> Self {
        GlintError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GlintError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GlintError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for GlintError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        GlintError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GlintError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = GlintError::CaptureTimeout(Duration::from_millis(100));
        assert!(e.to_string().contains("capture"));
    }

    #[test]
    fn stage_recoverable_classification() {
        assert!(GlintError::CaptureTimeout(Duration::ZERO).is_stage_recoverable());
        assert!(GlintError::EncodeFault("bad geometry".into()).is_stage_recoverable());
        assert!(GlintError::InjectionFailure("keycode".into()).is_stage_recoverable());
        assert!(!GlintError::TransportDisconnect.is_stage_recoverable());
        assert!(!GlintError::AuthenticationFailure.is_stage_recoverable());
    }

    #[test]
    fn from_string() {
        let e: GlintError = "something broke".into();
        assert!(matches!(e, GlintError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: GlintError = io_err.into();
        assert!(matches!(e, GlintError::Io(_)));
    }
}
