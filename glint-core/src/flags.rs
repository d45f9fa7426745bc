//! Per-packet flag byte carried in the wire header.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in every wire header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        /// The payload is a self-contained keyframe.
        const KEYFRAME = 0b0000_0001;
        /// The payload is a delta against the previous frame.
        const DELTA = 0b0000_0010;
        /// Clear-text handshake frame. Only accepted while the session
        /// has no negotiated keys.
        const HANDSHAKE = 0b0000_0100;
        /// Out-of-band delivery acknowledgement. Unsequenced; never
        /// acknowledged itself.
        const ACK = 0b0000_1000;
    }
}
