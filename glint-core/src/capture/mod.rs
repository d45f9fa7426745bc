//! Frame source abstraction: display capture and external capture
//! devices behind one pull-based capability.
//!
//! Capture is driven by the encoder pipeline pulling at the cadence the
//! active quality profile dictates. A stalled device returns
//! [`GlintError::CaptureTimeout`] within the deadline instead of
//! blocking; the pipeline then repeats the previous frame.
//!
//! Platform capture backends (DXGI, V4L2, capture cards) live outside
//! this crate and plug in through [`CaptureDevice`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GlintError;

// ── SourceId ─────────────────────────────────────────────────────

/// Identity of a capture source: a monitor or an external device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    /// Display capture by monitor index (0 = primary).
    Monitor(u32),
    /// External capture device (camera, capture card) by device handle.
    Device(u32),
}

impl SourceId {
    /// Whether frames from this source ride the Device channel instead
    /// of the Video channel.
    pub fn is_device(&self) -> bool {
        matches!(self, SourceId::Device(_))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Monitor(i) => write!(f, "monitor:{i}"),
            SourceId::Device(i) => write!(f, "device:{i}"),
        }
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// One raw captured frame.
///
/// Immutable once captured. Owned exclusively by the pipeline stage
/// currently processing it; ownership moves stage to stage.
///
/// `stride` may exceed `width * bytes_per_pixel` when the capture
/// backend pads rows for alignment.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Which source produced this frame.
    pub source: SourceId,
    /// Capture-side sequence number, assigned by the selector.
    pub sequence: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawFrame {
    /// Total byte size of the raw bitmap.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// One row of pixels, including padding bytes.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.stride as usize]
    }
}

// ── FrameSource ──────────────────────────────────────────────────

/// A single open capture stream.
#[async_trait]
pub trait FrameSource: Send {
    /// The source this stream captures.
    fn source_id(&self) -> SourceId;

    /// Produce the next frame, waiting at most `deadline`.
    ///
    /// Returns [`GlintError::CaptureTimeout`] when no frame arrives in
    /// time — never blocks past the deadline.
    async fn next_frame(&mut self, deadline: Duration) -> Result<RawFrame, GlintError>;
}

/// Capture-capability collaborator: enumerates available sources and
/// opens them as frame streams.
pub trait CaptureDevice: Send + Sync {
    fn enumerate(&self) -> Vec<SourceId>;

    fn open(&self, id: SourceId) -> Result<Box<dyn FrameSource>, GlintError>;
}

// ── SourceSelector ───────────────────────────────────────────────

/// Owns the active frame source and makes source switching atomic from
/// the consumer's perspective: after [`switch_to`] succeeds, the next
/// [`next_frame`] call yields a frame tagged with the new source id.
/// Frames from the old source still queued downstream are discarded by
/// the consumer comparing their source tag against [`active`].
///
/// [`switch_to`]: SourceSelector::switch_to
/// [`next_frame`]: SourceSelector::next_frame
/// [`active`]: SourceSelector::active
pub struct SourceSelector {
    devices: Arc<dyn CaptureDevice>,
    current: Box<dyn FrameSource>,
    active: SourceId,
    sequence: u64,
}

impl SourceSelector {
    /// Open the initial source.
    pub fn open(devices: Arc<dyn CaptureDevice>, id: SourceId) -> Result<Self, GlintError> {
        let current = devices.open(id)?;
        Ok(Self {
            devices,
            current,
            active: id,
            sequence: 0,
        })
    }

    /// The currently active source.
    pub fn active(&self) -> SourceId {
        self.active
    }

    /// Available sources.
    pub fn enumerate(&self) -> Vec<SourceId> {
        self.devices.enumerate()
    }

    /// Switch to another source. The old stream is dropped (closing it);
    /// the switch fails without side effects if the new source cannot
    /// be opened.
    pub fn switch_to(&mut self, id: SourceId) -> Result<(), GlintError> {
        if id == self.active {
            return Ok(());
        }
        let next = self.devices.open(id)?;
        self.current = next;
        self.active = id;
        Ok(())
    }

    /// Pull the next frame from the active source.
    ///
    /// Frames still tagged with a stale source id (a backend flushing
    /// old buffers after a hot-swap) are drained and discarded within
    /// the same deadline.
    pub async fn next_frame(&mut self, deadline: Duration) -> Result<RawFrame, GlintError> {
        let started = Instant::now();
        loop {
            let remaining = deadline
                .checked_sub(started.elapsed())
                .ok_or(GlintError::CaptureTimeout(deadline))?;
            let mut frame = self.current.next_frame(remaining).await?;
            if frame.source != self.active {
                // Stale frame from before a switch — discard and re-pull.
                continue;
            }
            self.sequence += 1;
            frame.sequence = self.sequence;
            return Ok(frame);
        }
    }
}

// ── TestPatternSource ────────────────────────────────────────────

/// Deterministic in-memory frame source for tests and loopback demos.
///
/// Produces a flat background with a small block that moves and changes
/// value every pull, so consecutive frames differ in a couple of tiles
/// (delta frames) rather than everywhere. A configurable per-frame
/// delay can exceed the pull deadline to simulate a stalled device.
pub struct TestPatternSource {
    id: SourceId,
    width: u32,
    height: u32,
    counter: u8,
    delay: Duration,
}

impl TestPatternSource {
    pub fn new(id: SourceId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            counter: 0,
            delay: Duration::ZERO,
        }
    }

    /// Simulate a slow device: each pull takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    fn source_id(&self) -> SourceId {
        self.id
    }

    async fn next_frame(&mut self, deadline: Duration) -> Result<RawFrame, GlintError> {
        if self.delay > deadline {
            tokio::time::sleep(deadline).await;
            return Err(GlintError::CaptureTimeout(deadline));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.counter = self.counter.wrapping_add(1);
        let stride = self.width * 4;
        let mut data = vec![0x20u8; (stride * self.height) as usize];

        // Paint the moving block.
        let block = 8u32.min(self.width).min(self.height);
        let bx = (self.counter as u32 * block) % (self.width - block + 1);
        let by = (self.counter as u32 * block / 2) % (self.height - block + 1);
        for y in by..by + block {
            for x in bx..bx + block {
                let offset = (y * stride + x * 4) as usize;
                data[offset..offset + 4].copy_from_slice(&[self.counter; 4]);
            }
        }

        Ok(RawFrame {
            source: self.id,
            sequence: 0, // assigned by the selector
            width: self.width,
            height: self.height,
            stride,
            format: PixelFormat::Bgra8,
            data,
            timestamp: Instant::now(),
        })
    }
}

/// [`CaptureDevice`] over a fixed set of test-pattern sources.
pub struct TestCaptureDevice {
    sources: Vec<SourceId>,
    width: u32,
    height: u32,
}

impl TestCaptureDevice {
    pub fn new(sources: Vec<SourceId>, width: u32, height: u32) -> Self {
        Self {
            sources,
            width,
            height,
        }
    }
}

impl CaptureDevice for TestCaptureDevice {
    fn enumerate(&self) -> Vec<SourceId> {
        self.sources.clone()
    }

    fn open(&self, id: SourceId) -> Result<Box<dyn FrameSource>, GlintError> {
        if !self.sources.contains(&id) {
            return Err(GlintError::SourceUnavailable(id.to_string()));
        }
        Ok(Box::new(TestPatternSource::new(id, self.width, self.height)))
    }
}

// ── Tests ────────────────────────────────────────────────────────
