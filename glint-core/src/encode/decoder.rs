//! Viewer-side frame decoder.
//!
//! Decompresses encoded payloads and patches them into a persistent
//! frame buffer. Keyframes replace the buffer; deltas patch dirty rects
//! into it. A delta arriving before any keyframe (stream start, or after
//! a loss the encoder has not yet repaired) is skipped — the decoder
//! stays quiet until the next keyframe restores a reference.

use crate::error::GlintError;
use crate::protocol::video::VideoPayload;

/// Bytes per pixel of the decoded BGRA frame buffer.
const BPP: usize = 4;

/// Stateful decoder holding the reassembled screen image.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    /// `true` once a keyframe has established a decode reference.
    synced: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            width: 0,
            height: 0,
            synced: false,
        }
    }

    /// Whether a keyframe reference is currently established.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Decode one payload into the frame buffer.
    ///
    /// Returns the full up-to-date image, or `None` when the payload was
    /// a delta without an established reference (awaiting keyframe).
    pub fn decode(
        &mut self,
        payload: &VideoPayload,
        keyframe: bool,
    ) -> Result<Option<&[u8]>, GlintError> {
        let raw = zstd::decode_all(payload.data.as_slice())
            .map_err(|e| GlintError::Encoding(format!("zstd decode failed: {e}")))?;

        if keyframe {
            self.apply_keyframe(payload.width, payload.height, &raw)?;
        } else {
            if !self.synced || payload.width != self.width || payload.height != self.height {
                return Ok(None);
            }
            self.apply_delta(&raw)?;
        }

        Ok(Some(&self.buffer))
    }

    /// The current image, valid once synced.
    pub fn frame_buffer(&self) -> &[u8] {
        &self.buffer
    }

    // ── Internal ─────────────────────────────────────────────────

    fn apply_keyframe(&mut self, width: u32, height: u32, raw: &[u8]) -> Result<(), GlintError> {
        let expected = width as usize * height as usize * BPP;
        if raw.len() < expected {
            return Err(GlintError::Encoding(format!(
                "keyframe too short: {} < {expected}",
                raw.len()
            )));
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(&raw[..expected]);
        self.width = width;
        self.height = height;
        self.synced = true;
        Ok(())
    }

    fn apply_delta(&mut self, raw: &[u8]) -> Result<(), GlintError> {
        if raw.len() < 4 {
            return Err(GlintError::Encoding("delta missing tile count".into()));
        }
        let count = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
        let row_stride = self.width as usize * BPP;
        let mut offset = 4;

        for _ in 0..count {
            if offset + 16 > raw.len() {
                return Err(GlintError::Encoding("delta truncated at tile header".into()));
            }
            let x = u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap());
            let y = u32::from_le_bytes(raw[offset + 4..offset + 8].try_into().unwrap());
            let w = u32::from_le_bytes(raw[offset + 8..offset + 12].try_into().unwrap());
            let h = u32::from_le_bytes(raw[offset + 12..offset + 16].try_into().unwrap());
            offset += 16;

            if x + w > self.width || y + h > self.height {
                return Err(GlintError::Encoding("delta tile out of bounds".into()));
            }

            let tile_row = w as usize * BPP;
            for row in 0..h as usize {
                let src_end = offset + tile_row;
                if src_end > raw.len() {
                    return Err(GlintError::Encoding("delta truncated at tile data".into()));
                }
                let dst = (y as usize + row) * row_stride + x as usize * BPP;
                self.buffer[dst..dst + tile_row].copy_from_slice(&raw[offset..src_end]);
                offset = src_end;
            }
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
