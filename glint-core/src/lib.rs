//! # glint-core
//!
//! Streaming-and-control engine for remote desktop sessions: a host
//! captures display or capture-device frames, delta-encodes and
//! compresses them, and streams them over an encrypted multiplexed
//! link to a viewer, which paces playback and sends input events back
//! for injection.
//!
//! This crate contains:
//! - **Wire types**: `PacketHeader`, `WirePacket`, `PacketFlags`,
//!   `ChannelId` — the framed, channel-tagged, sealed transport unit
//! - **Codec**: `GlintCodec` for framed stream I/O via `tokio_util`
//! - **Crypto**: X25519 key exchange and ChaCha20-Poly1305 payload
//!   sealing (`KeyExchange`, `SessionCrypto`)
//! - **Protocol payloads**: handshake, control, input, and video
//!   messages (bincode)
//! - **Capture**: the `FrameSource`/`CaptureDevice` capability and the
//!   atomically-switching `SourceSelector`
//! - **Encode**: tile-delta detection, the adaptive `PipelineEncoder`,
//!   and the viewer-side `FrameDecoder`
//! - **Transport**: the `Link`, reliable retransmission, the reorder
//!   window, and the sealing `ChannelMux`
//! - **Session**: the `SessionPhase` lifecycle machine, quality
//!   profiles, congestion adaptation, and metrics
//! - **Playback**: the jitter-absorbing, oldest-dropping
//!   `PlaybackSynchronizer`
//! - **Engines**: `HostSession` and `ViewerSession` orchestrators
//!
//! The graphical shell, credential storage, and OS capture/input
//! backends are external collaborators behind the `CaptureDevice`,
//! `OSInputBackend`, and credential traits.

pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod encode;
pub mod error;
pub mod flags;
pub mod header;
pub mod host;
pub mod input;
pub mod packet;
pub mod pipeline;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod viewer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{ChannelId, DeliveryPolicy};
pub use codec::GlintCodec;
pub use config::EngineConfig;
pub use error::GlintError;
pub use flags::PacketFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, TAG_SIZE, WirePacket};

pub use capture::{
    CaptureDevice, FrameSource, PixelFormat, RawFrame, SourceId, SourceSelector, TestCaptureDevice,
    TestPatternSource,
};
pub use crypto::{
    CredentialProver, CredentialVerifier, KeyExchange, Role, SessionCrypto,
    SharedSecretCredential,
};
pub use encode::{DeltaDetector, EncodedPacket, FrameDecoder, PipelineEncoder};
pub use host::{HostOutcome, HostSession, ResumeToken};
pub use input::{InputInjector, OSInputBackend, RecordingBackend};
pub use pipeline::HandoffQueue;
pub use playback::{PlaybackFrame, PlaybackSynchronizer};
pub use protocol::{ControlMessage, DisconnectReason, InputAction, InputEvent, RejectReason};
pub use session::{
    CloseReason, MetricsSnapshot, ProfileHandle, QualityProfile, SessionId, SessionMetrics,
    SessionPhase,
};
pub use transport::{ChannelMux, InboundFrame, Link, ReorderWindow};
pub use viewer::{Dialer, TcpDialer, ViewerSession};
