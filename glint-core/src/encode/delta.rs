//! Tile-level change detection between consecutive frames.
//!
//! The frame is divided into square tiles and each tile is compared
//! byte-for-byte against the previous frame. Only changed tiles reach
//! the encoder, which keeps a mostly-static desktop cheap to stream.

use std::cmp;

use crate::capture::RawFrame;

// ── DirtyRect ────────────────────────────────────────────────────

/// A rectangular region that changed since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ── FrameDelta ───────────────────────────────────────────────────

/// Result of one detection pass.
#[derive(Debug, Clone)]
pub struct FrameDelta {
    /// Tiles that differ from the previous frame.
    pub dirty: Vec<DirtyRect>,
    /// When `true` the whole frame must be encoded (first frame,
    /// dimension change, or most of the screen changed).
    pub full: bool,
}

// ── DeltaDetector ────────────────────────────────────────────────

/// When more than this fraction of tiles changed, a full frame is
/// cheaper than per-tile headers.
const FULL_FRAME_RATIO: f64 = 0.80;

/// Stateful detector remembering the previous frame.
pub struct DeltaDetector {
    previous: Option<RawFrame>,
    tile_size: usize,
}

impl DeltaDetector {
    /// `tile_size` is the square tile edge in pixels; 64 amortises the
    /// per-tile overhead well on typical desktops.
    pub fn new(tile_size: usize) -> Self {
        assert!(tile_size > 0, "tile_size must be > 0");
        Self {
            previous: None,
            tile_size,
        }
    }

    /// Forget the previous frame, forcing the next pass to be full.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compare `current` against the stored previous frame, then store
    /// `current` for the next pass.
    pub fn detect(&mut self, current: &RawFrame) -> FrameDelta {
        let delta = match &self.previous {
            Some(prev) if prev.width == current.width && prev.height == current.height => {
                self.compare(current, prev)
            }
            _ => FrameDelta {
                dirty: vec![DirtyRect {
                    x: 0,
                    y: 0,
                    width: current.width,
                    height: current.height,
                }],
                full: true,
            },
        };
        self.previous = Some(current.clone());
        delta
    }

    // ── Internal ─────────────────────────────────────────────────

    fn compare(&self, current: &RawFrame, previous: &RawFrame) -> FrameDelta {
        let w = current.width as usize;
        let h = current.height as usize;
        let ts = self.tile_size;

        let tiles_x = w.div_ceil(ts);
        let tiles_y = h.div_ceil(ts);

        let mut dirty = Vec::new();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * ts;
                let y0 = ty * ts;
                let x1 = cmp::min(x0 + ts, w);
                let y1 = cmp::min(y0 + ts, h);

                if Self::tile_differs(current, previous, x0, y0, x1, y1) {
                    dirty.push(DirtyRect {
                        x: x0 as u32,
                        y: y0 as u32,
                        width: (x1 - x0) as u32,
                        height: (y1 - y0) as u32,
                    });
                }
            }
        }

        let total = tiles_x * tiles_y;
        let full = !dirty.is_empty() && dirty.len() as f64 / total as f64 > FULL_FRAME_RATIO;

        FrameDelta {
            dirty: if full {
                vec![DirtyRect {
                    x: 0,
                    y: 0,
                    width: current.width,
                    height: current.height,
                }]
            } else {
                dirty
            },
            full,
        }
    }

    /// Row-by-row byte comparison of one tile.
    fn tile_differs(
        current: &RawFrame,
        previous: &RawFrame,
        x0: usize,
        y0: usize,
        x1: usize,
        y1: usize,
    ) -> bool {
        let bpp = current.format.bytes_per_pixel();
        let cur_stride = current.stride as usize;
        let prev_stride = previous.stride as usize;
        let left = x0 * bpp;
        let right = x1 * bpp;

        for y in y0..y1 {
            let cur = &current.data[y * cur_stride + left..y * cur_stride + right];
            let prev = &previous.data[y * prev_stride + left..y * prev_stride + right];
            if cur != prev {
                return true;
            }
        }
        false
    }
}

// ── Tests ────────────────────────────────────────────────────────
