//! Adaptive frame encoder.
//!
//! Consumes raw frames in capture order and emits compressed packets:
//!
//! - **Keyframe**: every row packed tightly, zstd-compressed. Decodes
//!   with no prior reference.
//! - **Delta**: `[tile_count:u32]` then per tile
//!   `[x:u32][y:u32][w:u32][h:u32][pixels]`, zstd-compressed.
//!
//! The encoder rereads the quality profile between frames only — a
//! profile change never touches a frame already in encode. A resolution
//! change resets the delta reference and forces a keyframe, as do source
//! switches, stream (re)starts, and encoder faults.

use std::time::Instant;

use crate::capture::RawFrame;
use crate::channel::ChannelId;
use crate::encode::delta::{DeltaDetector, DirtyRect};
use crate::error::GlintError;
use crate::session::quality::ProfileHandle;

// ── EncodedPacket ────────────────────────────────────────────────

/// A compressed frame ready for the channel mux.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Channel this packet targets (Video for monitors, Device for
    /// capture devices).
    pub channel: ChannelId,
    /// Monotonic frame counter.
    pub frame_number: u64,
    /// Capture timestamp of the source frame.
    pub timestamp: Instant,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Self-contained keyframe vs delta against the previous frame.
    pub keyframe: bool,
    /// zstd-compressed payload.
    pub payload: Vec<u8>,
}

// ── PipelineEncoder ──────────────────────────────────────────────

/// Stateful encoder owned exclusively by the encode stage.
pub struct PipelineEncoder {
    delta: DeltaDetector,
    profile: ProfileHandle,
    /// Dimensions the delta reference was built at; a profile change to
    /// different dimensions resets the reference.
    encoded_dims: Option<(u32, u32)>,
    pending_keyframe: bool,
    frame_number: u64,
    /// zstd level: 1 = fastest, stepped up when over the bitrate budget.
    level: i32,
}

impl PipelineEncoder {
    pub fn new(profile: ProfileHandle, tile_size: usize) -> Self {
        Self {
            delta: DeltaDetector::new(tile_size),
            profile,
            encoded_dims: None,
            pending_keyframe: true,
            frame_number: 0,
            level: 1,
        }
    }

    /// Demand that the next encoded frame be a keyframe.
    pub fn force_keyframe(&mut self) {
        self.pending_keyframe = true;
    }

    /// Reset all encoder state after a fault. The next frame is a
    /// keyframe built from scratch.
    pub fn reset(&mut self) {
        self.delta.reset();
        self.encoded_dims = None;
        self.pending_keyframe = true;
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_number
    }

    /// Steer compression towards the profile's bitrate budget using the
    /// measured outbound rate. Called between frames by the send loop.
    pub fn adjust(&mut self, measured_bps: u64) {
        let budget = self.profile.load().bitrate_bps;
        if measured_bps > budget {
            self.level = (self.level + 1).min(9);
        } else if measured_bps < budget * 8 / 10 {
            self.level = (self.level - 1).max(1);
        }
    }

    /// Encode one frame. Returns `Ok(None)` when nothing changed and no
    /// keyframe is due — the frame produces no traffic.
    ///
    /// An [`GlintError::EncodeFault`] is recoverable: call [`reset`] and
    /// continue with the next frame.
    ///
    /// [`reset`]: PipelineEncoder::reset
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Option<EncodedPacket>, GlintError> {
        if frame.data.len() < frame.byte_len() {
            return Err(GlintError::EncodeFault(format!(
                "frame geometry mismatch: {} bytes for {}x{} stride {}",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.stride,
            )));
        }

        // Snapshot the profile once per frame.
        let profile = self.profile.load();

        // Downscale when the source exceeds the profile target.
        let scaled;
        let frame = if frame.width > profile.width || frame.height > profile.height {
            scaled = downscale(frame, profile.width, profile.height);
            &scaled
        } else {
            frame
        };

        // A change in encoded dimensions invalidates the delta reference.
        if self.encoded_dims != Some((frame.width, frame.height)) {
            self.delta.reset();
            self.pending_keyframe = true;
            self.encoded_dims = Some((frame.width, frame.height));
        }

        let delta = self.delta.detect(frame);
        let keyframe = self.pending_keyframe || delta.full;

        if !keyframe && delta.dirty.is_empty() {
            return Ok(None);
        }

        let raw = if keyframe {
            pack_full_frame(frame)
        } else {
            pack_dirty_rects(&delta.dirty, frame)
        };

        let payload = zstd::encode_all(raw.as_slice(), self.level)
            .map_err(|e| GlintError::EncodeFault(format!("zstd encode failed: {e}")))?;

        self.pending_keyframe = false;
        self.frame_number += 1;

        Ok(Some(EncodedPacket {
            channel: if frame.source.is_device() {
                ChannelId::Device
            } else {
                ChannelId::Video
            },
            frame_number: self.frame_number,
            timestamp: frame.timestamp,
            width: frame.width,
            height: frame.height,
            keyframe,
            payload,
        }))
    }
}

// ── Packing helpers ──────────────────────────────────────────────

/// Emit all rows packed tightly, stripping stride padding.
fn pack_full_frame(frame: &RawFrame) -> Vec<u8> {
    let bpp = frame.format.bytes_per_pixel();
    let row_len = frame.width as usize * bpp;
    let mut out = Vec::with_capacity(row_len * frame.height as usize);
    for y in 0..frame.height {
        let start = y as usize * frame.stride as usize;
        out.extend_from_slice(&frame.data[start..start + row_len]);
    }
    out
}

/// Emit `[count]` then `[rect header | rect pixels]` per dirty rect.
fn pack_dirty_rects(rects: &[DirtyRect], frame: &RawFrame) -> Vec<u8> {
    let bpp = frame.format.bytes_per_pixel();
    let mut out = Vec::new();
    out.extend_from_slice(&(rects.len() as u32).to_le_bytes());

    for rect in rects {
        out.extend_from_slice(&rect.x.to_le_bytes());
        out.extend_from_slice(&rect.y.to_le_bytes());
        out.extend_from_slice(&rect.width.to_le_bytes());
        out.extend_from_slice(&rect.height.to_le_bytes());

        let left = rect.x as usize * bpp;
        let row_bytes = rect.width as usize * bpp;
        for row in 0..rect.height {
            let offset = (rect.y + row) as usize * frame.stride as usize + left;
            out.extend_from_slice(&frame.data[offset..offset + row_bytes]);
        }
    }
    out
}

/// Nearest-neighbour downscale into a tightly-packed frame.
fn downscale(frame: &RawFrame, target_w: u32, target_h: u32) -> RawFrame {
    let bpp = frame.format.bytes_per_pixel();
    let tw = target_w.min(frame.width).max(1);
    let th = target_h.min(frame.height).max(1);
    let mut data = Vec::with_capacity(tw as usize * th as usize * bpp);

    for y in 0..th {
        let src_y = (y as u64 * frame.height as u64 / th as u64) as usize;
        let src_row = src_y * frame.stride as usize;
        for x in 0..tw {
            let src_x = (x as u64 * frame.width as u64 / tw as u64) as usize;
            let offset = src_row + src_x * bpp;
            data.extend_from_slice(&frame.data[offset..offset + bpp]);
        }
    }

    RawFrame {
        source: frame.source,
        sequence: frame.sequence,
        width: tw,
        height: th,
        stride: tw * bpp as u32,
        format: frame.format,
        data,
        timestamp: frame.timestamp,
    }
}

// ── Tests ────────────────────────────────────────────────────────
