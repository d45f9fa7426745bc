//! Structured wire payloads carried inside [`WirePacket`]s.
//!
//! Every payload here is a serde type serialized with bincode, sealed by
//! the channel mux before transmission (handshake frames excepted — they
//! carry the key exchange and travel in clear).
//!
//! [`WirePacket`]: crate::packet::WirePacket

pub mod control;
pub mod handshake;
pub mod input;
pub mod video;

pub use control::{Ack, ControlMessage, DisconnectReason};
pub use handshake::{
    Accept, Capabilities, Challenge, Connect, HandshakeMessage, RejectReason, Response, ResumeHint,
};
pub use input::{ButtonAction, InputAction, InputEvent, MouseButton};
pub use video::VideoPayload;
