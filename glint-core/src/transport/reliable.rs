//! Outbound retransmission state for reliable channels.
//!
//! Every sent packet is tracked until a cumulative acknowledgement
//! covers it. Unacknowledged packets are retransmitted after the ack
//! timeout; a packet that exhausts its retry budget declares the
//! session dead.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::channel::ChannelId;
use crate::config::ReliableConfig;
use crate::error::GlintError;
use crate::packet::WirePacket;

struct Pending {
    packet: WirePacket,
    sent_at: Instant,
    retries: u32,
}

/// Per-channel outbound reliability state.
pub struct ReliableOutbound {
    channel: ChannelId,
    cfg: ReliableConfig,
    pending: BTreeMap<u32, Pending>,
    /// EWMA round-trip time in microseconds (α = 1/8), measured from
    /// first transmission to acknowledgement.
    rtt_us: u64,
}

impl ReliableOutbound {
    pub fn new(channel: ChannelId, cfg: ReliableConfig) -> Self {
        Self {
            channel,
            cfg,
            pending: BTreeMap::new(),
            rtt_us: 0,
        }
    }

    /// Track a packet that was just transmitted.
    pub fn track(&mut self, packet: WirePacket, now: Instant) {
        self.pending.insert(
            packet.sequence(),
            Pending {
                packet,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Apply a cumulative acknowledgement: everything at or below
    /// `through` is delivered. Returns the acknowledged sequences with
    /// their measured round trips.
    pub fn acknowledge(&mut self, through: u32, now: Instant) -> Vec<(u32, Duration)> {
        let acked: Vec<u32> = self
            .pending
            .range(..=through)
            .map(|(&seq, _)| seq)
            .collect();

        let mut out = Vec::with_capacity(acked.len());
        for seq in acked {
            if let Some(p) = self.pending.remove(&seq) {
                let rtt = now.duration_since(p.sent_at);
                // Retransmitted packets give ambiguous samples; skip them.
                if p.retries == 0 {
                    let us = rtt.as_micros() as u64;
                    self.rtt_us = if self.rtt_us == 0 {
                        us
                    } else {
                        self.rtt_us * 7 / 8 + us / 8
                    };
                }
                out.push((seq, rtt));
            }
        }
        out
    }

    /// Collect packets due for retransmission.
    ///
    /// Returns [`GlintError::RetriesExhausted`] once any packet has been
    /// retransmitted `max_retries` times without acknowledgement.
    pub fn due_for_retransmit(&mut self, now: Instant) -> Result<Vec<WirePacket>, GlintError> {
        let timeout = self.cfg.ack_timeout();
        let mut due = Vec::new();

        for (&seq, pending) in self.pending.iter_mut() {
            if now.duration_since(pending.sent_at) < timeout {
                continue;
            }
            if pending.retries >= self.cfg.max_retries {
                return Err(GlintError::RetriesExhausted {
                    channel: self.channel,
                    sequence: seq,
                });
            }
            pending.retries += 1;
            pending.sent_at = now;
            due.push(pending.packet.clone());
        }
        Ok(due)
    }

    /// Smoothed round-trip time, zero until first measured.
    pub fn rtt(&self) -> Duration {
        Duration::from_micros(self.rtt_us)
    }

    /// Packets awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PacketFlags;
    use crate::packet::TAG_SIZE;

    fn packet(seq: u32) -> WirePacket {
        WirePacket::new(
            ChannelId::Input,
            seq,
            PacketFlags::empty(),
            vec![0u8; 8],
            [0u8; TAG_SIZE],
        )
        .unwrap()
    }

    fn outbound() -> ReliableOutbound {
        ReliableOutbound::new(ChannelId::Input, ReliableConfig::default())
    }

    #[test]
    fn cumulative_ack_clears_everything_below() {
        let mut rel = outbound();
        let t0 = Instant::now();
        for seq in 1..=5 {
            rel.track(packet(seq), t0);
        }

        let acked = rel.acknowledge(3, t0 + Duration::from_millis(10));
        assert_eq!(acked.len(), 3);
        assert_eq!(rel.in_flight(), 2);
        assert!(rel.rtt() >= Duration::from_millis(10));
    }

    #[test]
    fn retransmit_after_timeout() {
        let mut rel = outbound();
        let t0 = Instant::now();
        rel.track(packet(1), t0);

        // Not due yet.
        assert!(rel.due_for_retransmit(t0 + Duration::from_millis(100)).unwrap().is_empty());

        // Past the 250 ms ack timeout.
        let due = rel.due_for_retransmit(t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].sequence(), 1);
    }

    #[test]
    fn exhausted_retries_kill_the_session() {
        let cfg = ReliableConfig {
            ack_timeout_ms: 10,
            max_retries: 2,
        };
        let mut rel = ReliableOutbound::new(ChannelId::Control, cfg);
        let t0 = Instant::now();
        rel.track(packet(7), t0);

        let mut now = t0;
        for _ in 0..2 {
            now += Duration::from_millis(20);
            assert_eq!(rel.due_for_retransmit(now).unwrap().len(), 1);
        }
        now += Duration::from_millis(20);
        assert!(matches!(
            rel.due_for_retransmit(now),
            Err(GlintError::RetriesExhausted {
                channel: ChannelId::Control,
                sequence: 7,
            })
        ));
    }

    #[test]
    fn duplicate_ack_is_harmless() {
        let mut rel = outbound();
        let t0 = Instant::now();
        rel.track(packet(1), t0);
        let _ = rel.acknowledge(1, t0 + Duration::from_millis(5));
        assert!(rel.acknowledge(1, t0 + Duration::from_millis(6)).is_empty());
    }
}
