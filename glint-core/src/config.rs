//! Engine configuration.
//!
//! Every product-tuning parameter — congestion thresholds, backoff
//! schedule, window sizes, heartbeat cadence — lives here with a
//! documented default instead of a constant buried at a use site.
//! Durations are stored as integer milliseconds so a config can be
//! loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GlintError;
use crate::session::quality::QualityProfile;

// ── EngineConfig ─────────────────────────────────────────────────

/// Top-level configuration for both host and viewer engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub handshake: HandshakeConfig,
    pub heartbeat: HeartbeatConfig,
    pub reliable: ReliableConfig,
    pub reorder: ReorderConfig,
    pub adaptation: AdaptationConfig,
    pub reconnect: ReconnectConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    /// Consecutive packet-authentication failures tolerated before the
    /// session is terminated. Default: 5.
    pub tamper_threshold: u32,
    /// Capacity of the bounded stage hand-off queues. A full queue drops
    /// its oldest entry. Default: 2.
    pub queue_depth: usize,
    /// Initial quality profile offered in the handshake Accept.
    pub initial_profile: QualityProfile,
}

impl EngineConfig {
    /// Parse a TOML configuration document. Missing fields fall back to
    /// their defaults.
    pub fn from_toml_str(doc: &str) -> Result<Self, GlintError> {
        toml::from_str(doc).map_err(|e| GlintError::Config(e.to_string()))
    }
}

// Serde's `default` attribute needs per-struct defaults; each sub-config
// implements `Default` with its documented values.

/// Handshake step timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Bound on each handshake step (Connect→Challenge→Response→Accept).
    /// Exceeding it fails the attempt with `HandshakeTimeout`. Default: 5 s.
    pub step_timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 5_000,
        }
    }
}

impl HandshakeConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Liveness ping cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between Control-channel heartbeats. Default: 2 s.
    pub interval_ms: u64,
    /// Number of missed intervals before the peer is declared gone.
    /// Default: 3.
    pub miss_budget: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            miss_budget: 3,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Silence longer than this is a transport disconnect.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.interval_ms * self.miss_budget as u64)
    }
}

/// Reliable-channel retransmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    /// Time to wait for an acknowledgement before retransmitting.
    /// Default: 250 ms.
    pub ack_timeout_ms: u64,
    /// Retransmissions attempted per packet before the session is
    /// declared dead. Default: 8.
    pub max_retries: u32,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 250,
            max_retries: 8,
        }
    }
}

impl ReliableConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Best-effort-channel reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    /// Reorder window size in sequence numbers. Packets below the
    /// window's lower bound are dropped. Default: 16.
    pub window: u32,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self { window: 16 }
    }
}

/// Congestion-driven quality adaptation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Loss rate (per-mille) at or above which the session degrades.
    /// Default: 50 (5 %).
    pub degrade_loss_permille: u32,
    /// One-way delay estimate at or above which the session degrades.
    /// Default: 250 ms.
    pub degrade_delay_ms: u64,
    /// Hysteresis: recovery requires loss at or below this. Default: 10 (1 %).
    pub recover_loss_permille: u32,
    /// Hysteresis: recovery requires delay at or below this. Default: 100 ms.
    pub recover_delay_ms: u64,
    /// Conditions must hold below the recovery thresholds for this long
    /// before the session returns to Active. Default: 3 s.
    pub recover_hold_ms: u64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            degrade_loss_permille: 50,
            degrade_delay_ms: 250,
            recover_loss_permille: 10,
            recover_delay_ms: 100,
            recover_hold_ms: 3_000,
        }
    }
}

impl AdaptationConfig {
    pub fn degrade_delay(&self) -> Duration {
        Duration::from_millis(self.degrade_delay_ms)
    }

    pub fn recover_delay(&self) -> Duration {
        Duration::from_millis(self.recover_delay_ms)
    }

    pub fn recover_hold(&self) -> Duration {
        Duration::from_millis(self.recover_hold_ms)
    }
}

/// Reconnection backoff schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt. Default: 500 ms.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier applied per failed attempt. Default: 2.
    pub backoff_factor: u32,
    /// Attempts before the session transitions to Closed. Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            backoff_factor: 2,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1) as u64;
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor.pow(exp)))
    }
}

/// Frame capture timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Deadline for a single capture call. A stalled device returns a
    /// timeout and the previous frame is repeated. Default: 100 ms.
    pub frame_deadline_ms: u64,
    /// Delta-detection tile size in pixels. Default: 64.
    pub tile_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_deadline_ms: 100,
            tile_size: 64,
        }
    }
}

impl CaptureConfig {
    pub fn frame_deadline(&self) -> Duration {
        Duration::from_millis(self.frame_deadline_ms)
    }
}

/// Viewer-side display pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial jitter-absorption delay before the first frame is
    /// released. Default: 50 ms.
    pub jitter_delay_ms: u64,
    /// Maximum buffered frames; the oldest is dropped beyond this.
    /// Default: 3.
    pub max_depth: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            jitter_delay_ms: 50,
            max_depth: 3,
        }
    }
}

impl PlaybackConfig {
    pub fn jitter_delay(&self) -> Duration {
        Duration::from_millis(self.jitter_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reliable: ReliableConfig::default(),
            reorder: ReorderConfig::default(),
            adaptation: AdaptationConfig::default(),
            reconnect: ReconnectConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            tamper_threshold: 5,
            queue_depth: 2,
            initial_profile: QualityProfile::default(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
