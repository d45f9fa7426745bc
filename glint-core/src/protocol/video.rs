//! Video/Device-channel frame payload.
//!
//! The keyframe/delta distinction travels in the packet flags; the
//! payload carries the dimensions and compressed bytes the decoder
//! needs. `data` is the zstd-compressed tile stream produced by the
//! encoder.

use serde::{Deserialize, Serialize};

use crate::error::GlintError;

/// One encoded frame on the Video or Device channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPayload {
    /// Monotonic frame counter from the encoder.
    pub frame_number: u64,
    /// Capture timestamp, microseconds on the host's session clock.
    pub timestamp_us: u64,
    /// Encoded frame width in pixels.
    pub width: u32,
    /// Encoded frame height in pixels.
    pub height: u32,
    /// zstd-compressed frame data.
    pub data: Vec<u8>,
}

impl VideoPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, GlintError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
