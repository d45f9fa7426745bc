//! Channel multiplexer: seals every outbound payload, opens and routes
//! every inbound packet by its channel's delivery policy, and collects
//! the per-channel state the congestion and reliability machinery needs.
//!
//! - Control/Input: in-order delivery with cumulative out-of-band acks;
//!   outbound packets are tracked for retransmission.
//! - Video/Device: reorder window, gap skipping, loss counting.
//! - Authentication failures are dropped silently and counted; crossing
//!   the tamper threshold surfaces as a session-terminating error.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::channel::ChannelId;
use crate::config::EngineConfig;
use crate::crypto::SessionCrypto;
use crate::error::GlintError;
use crate::flags::PacketFlags;
use crate::header::PacketHeader;
use crate::packet::{MAX_PAYLOAD_SIZE, TAG_SIZE, WirePacket};
use crate::protocol::control::{Ack, ControlMessage};
use crate::protocol::handshake::HandshakeMessage;
use crate::protocol::input::InputEvent;
use crate::protocol::video::VideoPayload;
use crate::transport::link::LinkSender;
use crate::transport::reliable::ReliableOutbound;
use crate::transport::reorder::ReorderWindow;

// ── InboundFrame ─────────────────────────────────────────────────

/// A decoded, in-policy-order inbound message.
#[derive(Debug)]
pub enum InboundFrame {
    Control {
        sequence: u32,
        message: ControlMessage,
    },
    Input {
        sequence: u32,
        event: InputEvent,
    },
    Video {
        sequence: u32,
        keyframe: bool,
        payload: VideoPayload,
    },
    Device {
        sequence: u32,
        keyframe: bool,
        payload: VideoPayload,
    },
    /// Raw handshake payload; interpreted by the handshake driver.
    Handshake { payload: Vec<u8> },
}

// ── ChannelMux ───────────────────────────────────────────────────

/// Per-session channel multiplexer. Owned by the session loop.
pub struct ChannelMux {
    sender: LinkSender,
    crypto: Option<SessionCrypto>,

    /// Next outbound sequence per channel (sequenced domain).
    next_seq: [u32; 4],
    /// Dedicated counters for the ACK and handshake nonce domains.
    next_ack_seq: u32,
    next_handshake_seq: u32,

    /// Outbound reliability state for Control and Input.
    control_out: ReliableOutbound,
    input_out: ReliableOutbound,

    /// In-order inbound delivery for Control and Input: next expected
    /// sequence and the gap buffer.
    ordered_next: [u32; 2],
    ordered_buf: [BTreeMap<u32, (PacketFlags, Vec<u8>)>; 2],

    video_reorder: ReorderWindow<(PacketFlags, Vec<u8>)>,
    device_reorder: ReorderWindow<(PacketFlags, Vec<u8>)>,

    tamper_threshold: u32,
    consecutive_auth_failures: u32,
    auth_failures_total: u64,

    /// Latest Input-channel round trip (capture-to-acknowledged).
    last_input_rtt: Option<Duration>,
}

impl ChannelMux {
    pub fn new(sender: LinkSender, cfg: &EngineConfig) -> Self {
        Self {
            sender,
            crypto: None,
            next_seq: [1; 4],
            next_ack_seq: 1,
            next_handshake_seq: 1,
            control_out: ReliableOutbound::new(ChannelId::Control, cfg.reliable.clone()),
            input_out: ReliableOutbound::new(ChannelId::Input, cfg.reliable.clone()),
            ordered_next: [1; 2],
            ordered_buf: [BTreeMap::new(), BTreeMap::new()],
            video_reorder: ReorderWindow::new(cfg.reorder.window),
            device_reorder: ReorderWindow::new(cfg.reorder.window),
            tamper_threshold: cfg.tamper_threshold,
            consecutive_auth_failures: 0,
            auth_failures_total: 0,
            last_input_rtt: None,
        }
    }

    /// Install the negotiated session keys. Until this is called, only
    /// clear-text handshake frames are sent or accepted.
    pub fn install_crypto(&mut self, crypto: SessionCrypto) {
        self.crypto = Some(crypto);
    }

    pub fn has_crypto(&self) -> bool {
        self.crypto.is_some()
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Send a handshake message. Sealed once keys are installed
    /// (Response, Accept), clear before that (Connect, Challenge).
    pub async fn send_handshake(&mut self, msg: &HandshakeMessage) -> Result<(), GlintError> {
        let seq = self.next_handshake_seq;
        self.next_handshake_seq += 1;
        let payload = msg.to_bytes()?;
        let packet = self.seal_packet(
            ChannelId::Control,
            seq,
            PacketFlags::HANDSHAKE,
            payload,
        )?;
        self.transmit(packet).await
    }

    /// Send a control message on the reliable Control channel.
    pub async fn send_control(&mut self, msg: &ControlMessage) -> Result<u32, GlintError> {
        let payload = msg.to_bytes()?;
        let packet = self.next_sequenced(ChannelId::Control, PacketFlags::empty(), payload)?;
        let seq = packet.sequence();
        self.control_out.track(packet.clone(), Instant::now());
        self.transmit(packet).await?;
        Ok(seq)
    }

    /// Send an input event on the reliable Input channel.
    pub async fn send_input(&mut self, event: &InputEvent) -> Result<u32, GlintError> {
        let payload = event.to_bytes()?;
        let packet = self.next_sequenced(ChannelId::Input, PacketFlags::empty(), payload)?;
        let seq = packet.sequence();
        self.input_out.track(packet.clone(), Instant::now());
        self.transmit(packet).await?;
        Ok(seq)
    }

    /// Send an encoded frame on a best-effort media channel.
    pub async fn send_media(
        &mut self,
        channel: ChannelId,
        keyframe: bool,
        payload: &VideoPayload,
    ) -> Result<u32, GlintError> {
        debug_assert!(matches!(channel, ChannelId::Video | ChannelId::Device));
        let flags = if keyframe {
            PacketFlags::KEYFRAME
        } else {
            PacketFlags::DELTA
        };
        let packet = self.next_sequenced(channel, flags, payload.to_bytes()?)?;
        let seq = packet.sequence();
        self.transmit(packet).await?;
        Ok(seq)
    }

    /// Retransmit overdue reliable packets. Call on a timer tick.
    pub async fn poll_retransmit(&mut self, now: Instant) -> Result<(), GlintError> {
        let mut due = self.control_out.due_for_retransmit(now)?;
        due.extend(self.input_out.due_for_retransmit(now)?);
        for packet in due {
            debug!(
                channel = %packet.channel(),
                sequence = packet.sequence(),
                "retransmitting"
            );
            self.transmit(packet).await?;
        }
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Accept one packet off the link: authenticate, order, and decode.
    ///
    /// Returns every message that became deliverable. A packet failing
    /// authentication yields no messages; once `tamper_threshold`
    /// consecutive packets fail, returns
    /// [`GlintError::AuthenticationFailure`] and the session must close.
    pub async fn accept(
        &mut self,
        packet: WirePacket,
        now: Instant,
    ) -> Result<Vec<InboundFrame>, GlintError> {
        let flags = packet.flags();

        // Clear-text handshake frames, only before keys exist.
        if self.crypto.is_none() {
            if flags.contains(PacketFlags::HANDSHAKE) {
                return Ok(vec![InboundFrame::Handshake {
                    payload: packet.payload,
                }]);
            }
            // Sealed traffic before the handshake finished.
            return self.record_auth_failure();
        }

        let opened = {
            let crypto = self.crypto.as_ref().expect("crypto checked above");
            crypto.open(&packet.header, &packet.payload, &packet.tag)
        };
        let plaintext = match opened {
            Ok(p) => p,
            Err(GlintError::AuthenticationFailure) => return self.record_auth_failure(),
            Err(e) => return Err(e),
        };
        self.consecutive_auth_failures = 0;

        if flags.contains(PacketFlags::HANDSHAKE) {
            return Ok(vec![InboundFrame::Handshake { payload: plaintext }]);
        }

        if flags.contains(PacketFlags::ACK) {
            self.handle_ack(&plaintext, now)?;
            return Ok(Vec::new());
        }

        match packet.header.channel {
            ChannelId::Control | ChannelId::Input => {
                self.accept_ordered(packet.header, plaintext).await
            }
            ChannelId::Video => {
                let ready = self
                    .video_reorder
                    .push(packet.header.sequence, (flags, plaintext));
                decode_media(ready, /*device=*/ false)
            }
            ChannelId::Device => {
                let ready = self
                    .device_reorder
                    .push(packet.header.sequence, (flags, plaintext));
                decode_media(ready, /*device=*/ true)
            }
        }
    }

    // ── Feedback & stats ─────────────────────────────────────────

    /// Video-channel delivery stats: (delivered, lost, duplicates).
    pub fn video_stats(&self) -> (u64, u64, u64) {
        (
            self.video_reorder.delivered(),
            self.video_reorder.lost(),
            self.video_reorder.duplicates(),
        )
    }

    /// Total packets dropped for failed authentication.
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures_total
    }

    /// Latest measured Input-channel round trip.
    pub fn input_rtt(&self) -> Option<Duration> {
        self.last_input_rtt
    }

    /// Reliable packets awaiting acknowledgement.
    pub fn reliable_in_flight(&self) -> usize {
        self.control_out.in_flight() + self.input_out.in_flight()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn next_sequenced(
        &mut self,
        channel: ChannelId,
        flags: PacketFlags,
        payload: Vec<u8>,
    ) -> Result<WirePacket, GlintError> {
        let seq = self.next_seq[channel.index()];
        self.next_seq[channel.index()] += 1;
        self.seal_packet(channel, seq, flags, payload)
    }

    fn seal_packet(
        &mut self,
        channel: ChannelId,
        sequence: u32,
        flags: PacketFlags,
        payload: Vec<u8>,
    ) -> Result<WirePacket, GlintError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(GlintError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = PacketHeader::new(channel, sequence, flags, payload.len() as u32);
        match &self.crypto {
            Some(crypto) => {
                let (ciphertext, tag) = crypto.seal(&header, &payload)?;
                Ok(WirePacket {
                    header,
                    payload: ciphertext,
                    tag,
                })
            }
            None => {
                if !flags.contains(PacketFlags::HANDSHAKE) {
                    return Err(GlintError::ProtocolViolation(
                        "only handshake frames may be sent before key negotiation",
                    ));
                }
                Ok(WirePacket {
                    header,
                    payload,
                    tag: [0u8; TAG_SIZE],
                })
            }
        }
    }

    async fn transmit(&self, packet: WirePacket) -> Result<(), GlintError> {
        self.sender
            .send(packet)
            .await
            .map_err(|_| GlintError::TransportDisconnect)
    }

    fn record_auth_failure(&mut self) -> Result<Vec<InboundFrame>, GlintError> {
        self.auth_failures_total += 1;
        self.consecutive_auth_failures += 1;
        debug!(
            consecutive = self.consecutive_auth_failures,
            "dropping packet that failed authentication"
        );
        if self.consecutive_auth_failures >= self.tamper_threshold {
            warn!(
                failures = self.consecutive_auth_failures,
                "tamper threshold exceeded, terminating session"
            );
            return Err(GlintError::AuthenticationFailure);
        }
        Ok(Vec::new())
    }

    fn handle_ack(&mut self, plaintext: &[u8], now: Instant) -> Result<(), GlintError> {
        let ack = Ack::from_bytes(plaintext)?;
        let channel = ChannelId::try_from(ack.channel)?;
        match channel {
            ChannelId::Control => {
                let _ = self.control_out.acknowledge(ack.through, now);
            }
            ChannelId::Input => {
                let acked = self.input_out.acknowledge(ack.through, now);
                if let Some((_, rtt)) = acked.last() {
                    self.last_input_rtt = Some(*rtt);
                }
            }
            _ => {
                return Err(GlintError::ProtocolViolation(
                    "ack for a best-effort channel",
                ));
            }
        }
        Ok(())
    }

    async fn accept_ordered(
        &mut self,
        header: PacketHeader,
        plaintext: Vec<u8>,
    ) -> Result<Vec<InboundFrame>, GlintError> {
        let channel = header.channel;
        let slot = channel.index(); // 0 = Control, 1 = Input
        let next = self.ordered_next[slot];

        if header.sequence >= next {
            self.ordered_buf[slot].insert(header.sequence, (header.flags, plaintext));
        }
        // Duplicates below `next` fall through: the cumulative ack below
        // tells the sender to stop retransmitting.

        let mut delivered = Vec::new();
        while let Some((_, payload)) = self.ordered_buf[slot].remove(&self.ordered_next[slot]) {
            let seq = self.ordered_next[slot];
            self.ordered_next[slot] += 1;
            delivered.push(match channel {
                ChannelId::Control => InboundFrame::Control {
                    sequence: seq,
                    message: ControlMessage::from_bytes(&payload)?,
                },
                ChannelId::Input => InboundFrame::Input {
                    sequence: seq,
                    event: InputEvent::from_bytes(&payload)?,
                },
                _ => unreachable!("ordered channels are Control and Input"),
            });
        }

        // Cumulative ack for everything delivered so far.
        let through = self.ordered_next[slot] - 1;
        if through > 0 {
            self.send_ack(channel, through).await?;
        }
        Ok(delivered)
    }

    async fn send_ack(&mut self, channel: ChannelId, through: u32) -> Result<(), GlintError> {
        let ack = Ack {
            channel: channel as u8,
            through,
        };
        let seq = self.next_ack_seq;
        self.next_ack_seq += 1;
        let packet = self.seal_packet(ChannelId::Control, seq, PacketFlags::ACK, ack.to_bytes()?)?;
        self.transmit(packet).await
    }
}

/// Await the next handshake message on a link, bounded by the handshake
/// step deadline. Non-handshake frames arriving meanwhile are processed
/// and discarded.
pub(crate) async fn next_handshake(
    link: &mut crate::transport::link::Link,
    mux: &mut ChannelMux,
    step: Duration,
) -> Result<HandshakeMessage, GlintError> {
    let deadline = Instant::now() + step;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GlintError::HandshakeTimeout(step));
        }
        let packet = match link.recv_timeout(remaining).await {
            Ok(p) => p,
            Err(GlintError::Timeout(_)) => return Err(GlintError::HandshakeTimeout(step)),
            Err(e) => return Err(e),
        };
        for frame in mux.accept(packet, Instant::now()).await? {
            if let InboundFrame::Handshake { payload } = frame {
                return HandshakeMessage::from_bytes(&payload);
            }
        }
    }
}

/// Decode reorder-window output into media frames.
fn decode_media(
    ready: Vec<(u32, (PacketFlags, Vec<u8>))>,
    device: bool,
) -> Result<Vec<InboundFrame>, GlintError> {
    let mut out = Vec::with_capacity(ready.len());
    for (sequence, (flags, plaintext)) in ready {
        let payload = VideoPayload::from_bytes(&plaintext)?;
        let keyframe = flags.contains(PacketFlags::KEYFRAME);
        out.push(if device {
            InboundFrame::Device {
                sequence,
                keyframe,
                payload,
            }
        } else {
            InboundFrame::Video {
                sequence,
                keyframe,
                payload,
            }
        });
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────
