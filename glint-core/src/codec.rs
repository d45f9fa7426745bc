//! `GlintCodec` — framed wire I/O via `tokio_util`.
//!
//! Decodes the byte stream into [`WirePacket`]s and enforces size limits
//! before any payload is buffered. Encryption is not the codec's concern;
//! sealed payloads pass through opaque and are opened by the channel mux.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::GlintError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::packet::{MAX_PAYLOAD_SIZE, TAG_SIZE, WirePacket};

#[derive(Debug, Default)]
pub struct GlintCodec;

impl Decoder for GlintCodec {
    type Item = WirePacket;
    type Error = GlintError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::decode(&src[..HEADER_SIZE])?;
        if header.payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(GlintError::FrameTooLarge {
                size: header.payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = HEADER_SIZE + header.payload_len as usize + TAG_SIZE;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        Ok(Some(WirePacket::from_bytes(&frame)?))
    }
}

impl Encoder<WirePacket> for GlintCodec {
    type Error = GlintError;

    fn encode(&mut self, item: WirePacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.wire_len());
        dst.put_slice(&item.header.encode());
        dst.put_slice(&item.payload);
        dst.put_slice(&item.tag);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;
    use crate::flags::PacketFlags;

    fn sample_packet(payload: Vec<u8>) -> WirePacket {
        WirePacket::new(
            ChannelId::Video,
            3,
            PacketFlags::DELTA,
            payload,
            [7u8; TAG_SIZE],
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut codec = GlintCodec;
        let pkt = sample_packet(vec![0xAB; 128]);

        let mut buf = BytesMut::new();
        codec.encode(pkt.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, pkt);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = GlintCodec;
        let pkt = sample_packet(vec![1; 64]);

        let mut full = BytesMut::new();
        codec.encode(pkt, &mut full).unwrap();

        // Feed all but the last byte.
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut codec = GlintCodec;
        let a = sample_packet(vec![1; 8]);
        let b = sample_packet(vec![2; 8]);

        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut codec = GlintCodec;
        let mut buf = BytesMut::new();
        // Forge a header announcing an oversized payload.
        let mut hdr =
            PacketHeader::new(ChannelId::Video, 1, PacketFlags::empty(), 0).encode();
        hdr[6..10].copy_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_le_bytes());
        buf.put_slice(&hdr);
        assert!(codec.decode(&mut buf).is_err());
    }
}
