//! Encoder pipeline: tile-level delta detection, adaptive zstd frame
//! encoding on the host, and decoding back into a persistent frame
//! buffer on the viewer.

pub mod decoder;
pub mod delta;
pub mod encoder;

pub use decoder::FrameDecoder;
pub use delta::{DeltaDetector, DirtyRect, FrameDelta};
pub use encoder::{EncodedPacket, PipelineEncoder};
