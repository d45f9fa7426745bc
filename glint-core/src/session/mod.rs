//! Session state: lifecycle phase machine, quality profiles, congestion
//! adaptation, and per-session metrics.

pub mod congestion;
pub mod phase;
pub mod quality;

pub use congestion::{AdaptationAction, CongestionController, CongestionSample};
pub use phase::{CloseReason, SessionPhase};
pub use quality::{ProfileHandle, QualityProfile};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Unique session identifier, allocated by the host on Accept.
pub type SessionId = u64;

// ── SessionClock ─────────────────────────────────────────────────

/// Monotonic per-session clock. All wire timestamps are microseconds
/// since this clock's epoch; the two ends never compare absolute times.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    epoch: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds elapsed since the session epoch.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

// ── SessionMetrics ───────────────────────────────────────────────

/// Live counters for one session, shared across pipeline stages.
///
/// Plain data for the embedder to read; there is no metrics backend.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub frames_captured: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub input_injected: AtomicU64,
    pub input_skipped: AtomicU64,
    /// Latest capture-to-acknowledged round trip for input events, µs.
    pub input_rtt_us: AtomicU64,
    pub auth_failures: AtomicU64,
    /// Latest reported Video-channel loss, per mille.
    pub loss_permille: AtomicU64,
    /// Smoothed one-way delay estimate, µs.
    pub delay_us: AtomicU64,
}

impl SessionMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            input_injected: self.input_injected.load(Ordering::Relaxed),
            input_skipped: self.input_skipped.load(Ordering::Relaxed),
            input_rtt_us: self.input_rtt_us.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            loss_permille: self.loss_permille.load(Ordering::Relaxed),
            delay_us: self.delay_us.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub input_injected: u64,
    pub input_skipped: u64,
    pub input_rtt_us: u64,
    pub auth_failures: u64,
    pub loss_permille: u64,
    pub delay_us: u64,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_counters() {
        let metrics = SessionMetrics::shared();
        SessionMetrics::bump(&metrics.frames_captured);
        SessionMetrics::add(&metrics.bytes_sent, 1024);
        SessionMetrics::set(&metrics.delay_us, 5_000);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_captured, 1);
        assert_eq!(snap.bytes_sent, 1024);
        assert_eq!(snap.delay_us, 5_000);
        assert_eq!(snap.frames_dropped, 0);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }
}
