//! Congestion-driven quality adaptation.
//!
//! The controller consumes viewer-side condition reports (Video-channel
//! loss rate and one-way delay estimate) and decides when to step the
//! quality profile down, and when conditions have held below the
//! hysteresis thresholds long enough to restore it. The asymmetry —
//! degrade immediately, recover only after a sustained hold — prevents
//! oscillation on a jittery link.

use std::time::{Duration, Instant};

use crate::config::AdaptationConfig;
use crate::session::quality::QualityProfile;

// ── CongestionSample ─────────────────────────────────────────────

/// One measurement of network conditions.
#[derive(Debug, Clone, Copy)]
pub struct CongestionSample {
    /// Loss rate per mille over the report interval.
    pub loss_permille: u32,
    /// One-way delay estimate.
    pub delay: Duration,
}

// ── AdaptationAction ─────────────────────────────────────────────

/// What the session should do after observing a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationAction {
    /// Conditions are acceptable; keep streaming.
    None,
    /// Degrade to the given profile and transition to `Degraded`.
    Degrade(QualityProfile),
    /// Restore the given profile, transition to `Active`, and force a
    /// keyframe so the stream resynchronizes at full quality.
    Recover(QualityProfile),
}

// ── CongestionController ─────────────────────────────────────────

/// Single-owner adaptation state, driven by the session state machine.
pub struct CongestionController {
    cfg: AdaptationConfig,
    /// EWMA-smoothed delay in microseconds (α = 1/8).
    smoothed_delay_us: u64,
    /// Latest reported loss.
    loss_permille: u32,
    /// The profile streaming ran at before degradation, restored on
    /// recovery.
    held_profile: Option<QualityProfile>,
    /// Start of the current below-hysteresis streak, while degraded.
    calm_since: Option<Instant>,
}

impl CongestionController {
    pub fn new(cfg: AdaptationConfig) -> Self {
        Self {
            cfg,
            smoothed_delay_us: 0,
            loss_permille: 0,
            held_profile: None,
            calm_since: None,
        }
    }

    /// Smoothed one-way delay estimate.
    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.smoothed_delay_us)
    }

    /// Latest reported loss rate, per mille.
    pub fn loss_permille(&self) -> u32 {
        self.loss_permille
    }

    /// Feed one sample and decide on an action.
    ///
    /// `current` is the profile currently in effect; `degraded` is
    /// whether the session is in the Degraded phase.
    pub fn observe(
        &mut self,
        sample: CongestionSample,
        current: &QualityProfile,
        degraded: bool,
        now: Instant,
    ) -> AdaptationAction {
        self.loss_permille = sample.loss_permille;
        let delay_us = sample.delay.as_micros() as u64;
        if self.smoothed_delay_us == 0 {
            self.smoothed_delay_us = delay_us;
        } else {
            self.smoothed_delay_us = self.smoothed_delay_us * 7 / 8 + delay_us / 8;
        }

        let breach = self.loss_permille >= self.cfg.degrade_loss_permille
            || self.delay() >= self.cfg.degrade_delay();
        let calm = self.loss_permille <= self.cfg.recover_loss_permille
            && self.delay() <= self.cfg.recover_delay();

        if !degraded {
            if breach {
                self.held_profile = Some(*current);
                self.calm_since = None;
                return AdaptationAction::Degrade(current.downgraded());
            }
            return AdaptationAction::None;
        }

        // Degraded: look for a sustained calm streak.
        if !calm {
            self.calm_since = None;
            return AdaptationAction::None;
        }
        let since = *self.calm_since.get_or_insert(now);
        if now.duration_since(since) >= self.cfg.recover_hold() {
            self.calm_since = None;
            let restored = self.held_profile.take().unwrap_or(*current);
            return AdaptationAction::Recover(restored);
        }
        AdaptationAction::None
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> CongestionController {
        CongestionController::new(AdaptationConfig::default())
    }

    fn quiet() -> CongestionSample {
        CongestionSample {
            loss_permille: 0,
            delay: Duration::from_millis(20),
        }
    }

    fn lossy() -> CongestionSample {
        CongestionSample {
            loss_permille: 100, // 10 %, above the 5 % threshold
            delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn loss_above_threshold_degrades_within_one_cycle() {
        let mut ctl = controller();
        let active = QualityProfile::default();

        let action = ctl.observe(lossy(), &active, false, Instant::now());
        match action {
            AdaptationAction::Degrade(p) => assert!(p.bitrate_bps < active.bitrate_bps),
            other => panic!("expected Degrade, got {other:?}"),
        }
    }

    #[test]
    fn delay_above_threshold_degrades() {
        let mut ctl = controller();
        let active = QualityProfile::default();
        let sample = CongestionSample {
            loss_permille: 0,
            delay: Duration::from_millis(400),
        };
        assert!(matches!(
            ctl.observe(sample, &active, false, Instant::now()),
            AdaptationAction::Degrade(_)
        ));
    }

    #[test]
    fn quiet_conditions_take_no_action() {
        let mut ctl = controller();
        let active = QualityProfile::default();
        assert_eq!(
            ctl.observe(quiet(), &active, false, Instant::now()),
            AdaptationAction::None
        );
    }

    #[test]
    fn recovery_requires_a_sustained_hold() {
        let mut ctl = controller();
        let active = QualityProfile::default();

        let t0 = Instant::now();
        let AdaptationAction::Degrade(low) = ctl.observe(lossy(), &active, false, t0) else {
            panic!("expected degrade");
        };

        // Calm, but not for long enough yet.
        assert_eq!(ctl.observe(quiet(), &low, true, t0), AdaptationAction::None);
        assert_eq!(
            ctl.observe(quiet(), &low, true, t0 + Duration::from_secs(1)),
            AdaptationAction::None
        );

        // Past the hold window: restore the held profile.
        match ctl.observe(quiet(), &low, true, t0 + Duration::from_secs(4)) {
            AdaptationAction::Recover(p) => assert_eq!(p, active),
            other => panic!("expected Recover, got {other:?}"),
        }
    }

    #[test]
    fn relapse_resets_the_hold_timer() {
        let mut ctl = controller();
        let active = QualityProfile::default();

        let t0 = Instant::now();
        let AdaptationAction::Degrade(low) = ctl.observe(lossy(), &active, false, t0) else {
            panic!("expected degrade");
        };

        let _ = ctl.observe(quiet(), &low, true, t0);
        // Conditions relapse mid-hold.
        let _ = ctl.observe(lossy(), &low, true, t0 + Duration::from_secs(2));
        // Calm again, but the streak restarted: still no recovery at t0+5s.
        let _ = ctl.observe(quiet(), &low, true, t0 + Duration::from_secs(5));
        assert_eq!(
            ctl.observe(quiet(), &low, true, t0 + Duration::from_secs(6)),
            AdaptationAction::None
        );
    }
}
