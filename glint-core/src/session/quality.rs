//! Quality profiles and the shared snapshot handle.
//!
//! A [`QualityProfile`] is the negotiated resolution / bitrate /
//! frame-rate target. It is written only by the congestion controller
//! and read on the capture/encode hot path, so reads go through an
//! [`ArcSwap`] snapshot — single writer, many readers, no lock.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

// ── QualityProfile ───────────────────────────────────────────────

/// Target resolution, bitrate, and frame rate for the video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Target frame width in pixels.
    pub width: u32,
    /// Target frame height in pixels.
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,
    /// Target frames per second (1..=60).
    pub fps: u8,
}

impl QualityProfile {
    pub const fn new(width: u32, height: u32, bitrate_bps: u64, fps: u8) -> Self {
        Self {
            width,
            height,
            bitrate_bps,
            fps,
        }
    }

    /// The downgrade ladder, best first. Degradation steps down to the
    /// first rung with a lower bitrate than the current profile.
    pub const LADDER: [QualityProfile; 4] = [
        QualityProfile::new(1920, 1080, 8_000_000, 60),
        QualityProfile::new(1280, 720, 2_000_000, 30),
        QualityProfile::new(960, 540, 1_000_000, 30),
        QualityProfile::new(640, 360, 500_000, 15),
    ];

    /// Target interval between frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    /// The next rung down the ladder, or a 25 % bitrate reduction when
    /// already below the lowest rung. Always returns a profile with a
    /// strictly lower bitrate.
    pub fn downgraded(&self) -> QualityProfile {
        for rung in QualityProfile::LADDER {
            if rung.bitrate_bps < self.bitrate_bps {
                return rung;
            }
        }
        QualityProfile {
            bitrate_bps: (self.bitrate_bps * 3 / 4).max(100_000),
            ..*self
        }
    }
}

impl Default for QualityProfile {
    /// 720p / 2 Mbps / 30 fps — the default initial offer.
    fn default() -> Self {
        QualityProfile::LADDER[1]
    }
}

// ── ProfileHandle ────────────────────────────────────────────────

/// Shared handle to the current profile.
///
/// Cloning is cheap; all clones observe the same committed value.
/// Only the session state machine's adaptation logic calls [`store`].
///
/// [`store`]: ProfileHandle::store
#[derive(Clone)]
pub struct ProfileHandle {
    inner: Arc<ArcSwap<QualityProfile>>,
}

impl ProfileHandle {
    pub fn new(profile: QualityProfile) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(profile)),
        }
    }

    /// Snapshot the latest committed profile.
    pub fn load(&self) -> QualityProfile {
        **self.inner.load()
    }

    /// Commit a new profile. Readers observe it on their next load.
    pub fn store(&self, profile: QualityProfile) {
        self.inner.store(Arc::new(profile));
    }
}

impl std::fmt::Debug for ProfileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProfileHandle").field(&self.load()).finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_720p() {
        let p = QualityProfile::default();
        assert_eq!((p.width, p.height), (1280, 720));
        assert_eq!(p.bitrate_bps, 2_000_000);
        assert_eq!(p.fps, 30);
    }

    #[test]
    fn frame_interval_matches_fps() {
        let p = QualityProfile::new(1280, 720, 2_000_000, 30);
        let interval = p.frame_interval();
        assert!(interval > Duration::from_millis(33) && interval < Duration::from_millis(34));
    }

    #[test]
    fn downgrade_steps_down_the_ladder() {
        let top = QualityProfile::LADDER[0];
        let down = top.downgraded();
        assert_eq!(down, QualityProfile::LADDER[1]);
        assert!(down.bitrate_bps < top.bitrate_bps);
    }

    #[test]
    fn downgrade_below_ladder_reduces_bitrate() {
        let floor = QualityProfile::new(640, 360, 400_000, 15);
        let down = floor.downgraded();
        assert!(down.bitrate_bps < floor.bitrate_bps);
        assert_eq!(down.width, floor.width);
    }

    #[test]
    fn handle_snapshots_latest_value() {
        let handle = ProfileHandle::new(QualityProfile::default());
        let reader = handle.clone();

        let degraded = QualityProfile::default().downgraded();
        handle.store(degraded);
        assert_eq!(reader.load(), degraded);
    }
}
