//! Session lifecycle state machine.
//!
//! ```text
//!  Handshaking ──► Active ◄──────► Degraded
//!       │            │                │
//!       │            ▼                ▼
//!       │       Reconnecting ◄────────┘
//!       │        │       │
//!       ▼        ▼       ▼
//!   Rejected   Active   Closed
//!    Failed
//! ```
//!
//! Transitions are validated and return `Result` — an invalid transition
//! is a typed error, never a panic. `Rejected`, `Failed`, and `Closed`
//! are terminal.

use std::time::Instant;

use crate::error::GlintError;
use crate::protocol::handshake::RejectReason;

// ── CloseReason ──────────────────────────────────────────────────

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// This end requested the disconnect.
    Local,
    /// The peer requested the disconnect.
    Remote,
    /// Reconnection attempts were exhausted.
    RetriesExhausted,
    /// Too many packets failed authentication.
    TamperThreshold,
    /// Heartbeats stopped and no reconnect was possible.
    HeartbeatLoss,
    /// The session idled past its timeout.
    IdleTimeout,
}

// ── SessionPhase ─────────────────────────────────────────────────

/// The lifecycle phase of one streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// Exchanging Connect / Challenge / Response / Accept.
    Handshaking,

    /// Streaming at the negotiated profile.
    Active {
        /// When the session (last) entered Active.
        since: Instant,
    },

    /// Network conditions breached the degrade thresholds; running at a
    /// downgraded profile until conditions hold below the hysteresis
    /// thresholds.
    Degraded {
        /// When degradation began.
        since: Instant,
    },

    /// Transport dropped; retrying the handshake with backoff.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },

    /// Terminal: orderly or forced teardown.
    Closed { reason: CloseReason },

    /// Terminal: the host refused the handshake.
    Rejected { reason: RejectReason },

    /// Terminal: unrecoverable failure before a session existed.
    Failed { reason: &'static str },
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Handshaking
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Degraded { .. } => write!(f, "Degraded"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting(attempt {attempt})"),
            Self::Closed { .. } => write!(f, "Closed"),
            Self::Rejected { .. } => write!(f, "Rejected"),
            Self::Failed { .. } => write!(f, "Failed"),
        }
    }
}

impl SessionPhase {
    /// Streaming states (Active or Degraded).
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Active { .. } | Self::Degraded { .. })
    }

    /// Terminal states allow no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed { .. } | Self::Rejected { .. } | Self::Failed { .. }
        )
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Handshake (or resume) succeeded.
    ///
    /// Valid from: `Handshaking`, `Reconnecting`.
    pub fn activate(&mut self) -> Result<(), GlintError> {
        match self {
            Self::Handshaking | Self::Reconnecting { .. } => {
                *self = Self::Active {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot activate: not handshaking or reconnecting",
            )),
        }
    }

    /// Conditions breached the degrade thresholds.
    ///
    /// Valid from: `Active`.
    pub fn degrade(&mut self) -> Result<(), GlintError> {
        match self {
            Self::Active { .. } => {
                *self = Self::Degraded {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot degrade: not in Active state",
            )),
        }
    }

    /// Conditions held below the hysteresis thresholds long enough.
    ///
    /// Valid from: `Degraded`.
    pub fn recover(&mut self) -> Result<(), GlintError> {
        match self {
            Self::Degraded { .. } => {
                *self = Self::Active {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot recover: not in Degraded state",
            )),
        }
    }

    /// Transport dropped; start (or continue) reconnecting.
    ///
    /// Valid from: `Active`, `Degraded` (starts at attempt 1) and
    /// `Reconnecting` (increments the attempt counter).
    pub fn begin_reconnect_attempt(&mut self) -> Result<u32, GlintError> {
        match self {
            Self::Active { .. } | Self::Degraded { .. } => {
                *self = Self::Reconnecting { attempt: 1 };
                Ok(1)
            }
            Self::Reconnecting { attempt } => {
                *attempt += 1;
                Ok(*attempt)
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot reconnect: not in a streaming or reconnecting state",
            )),
        }
    }

    /// Terminal close.
    ///
    /// Valid from any non-terminal state.
    pub fn close(&mut self, reason: CloseReason) -> Result<(), GlintError> {
        if self.is_terminal() {
            return Err(GlintError::ProtocolViolation(
                "cannot close: already terminal",
            ));
        }
        *self = Self::Closed { reason };
        Ok(())
    }

    /// The host refused the handshake.
    ///
    /// Valid from: `Handshaking`, `Reconnecting` (resume refused).
    pub fn reject(&mut self, reason: RejectReason) -> Result<(), GlintError> {
        match self {
            Self::Handshaking | Self::Reconnecting { .. } => {
                *self = Self::Rejected { reason };
                Ok(())
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot reject: not handshaking",
            )),
        }
    }

    /// Unrecoverable failure while establishing the session.
    ///
    /// Valid from: `Handshaking`, `Reconnecting`.
    pub fn fail(&mut self, reason: &'static str) -> Result<(), GlintError> {
        match self {
            Self::Handshaking | Self::Reconnecting { .. } => {
                *self = Self::Failed { reason };
                Ok(())
            }
            _ => Err(GlintError::ProtocolViolation(
                "cannot fail: not handshaking",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = SessionPhase::default();
        assert_eq!(phase, SessionPhase::Handshaking);

        phase.activate().unwrap();
        assert!(phase.is_streaming());

        phase.degrade().unwrap();
        assert!(matches!(phase, SessionPhase::Degraded { .. }));

        phase.recover().unwrap();
        assert!(matches!(phase, SessionPhase::Active { .. }));

        phase.close(CloseReason::Local).unwrap();
        assert!(phase.is_terminal());
    }

    #[test]
    fn reconnect_counts_attempts() {
        let mut phase = SessionPhase::Active {
            since: Instant::now(),
        };
        assert_eq!(phase.begin_reconnect_attempt().unwrap(), 1);
        assert_eq!(phase.begin_reconnect_attempt().unwrap(), 2);
        assert_eq!(phase.begin_reconnect_attempt().unwrap(), 3);

        phase.activate().unwrap();
        assert!(phase.is_streaming());
    }

    #[test]
    fn exhausted_reconnect_closes() {
        let mut phase = SessionPhase::Reconnecting { attempt: 5 };
        phase.close(CloseReason::RetriesExhausted).unwrap();
        assert_eq!(
            phase,
            SessionPhase::Closed {
                reason: CloseReason::RetriesExhausted
            }
        );
        // Terminal: no further transitions.
        assert!(phase.activate().is_err());
        assert!(phase.begin_reconnect_attempt().is_err());
    }

    #[test]
    fn cannot_degrade_twice() {
        let mut phase = SessionPhase::Active {
            since: Instant::now(),
        };
        phase.degrade().unwrap();
        assert!(phase.degrade().is_err());
    }

    #[test]
    fn cannot_recover_from_active() {
        let mut phase = SessionPhase::Active {
            since: Instant::now(),
        };
        assert!(phase.recover().is_err());
    }

    #[test]
    fn reject_only_while_establishing() {
        let mut phase = SessionPhase::Handshaking;
        phase.reject(RejectReason::AuthFailed).unwrap();
        assert!(matches!(phase, SessionPhase::Rejected { .. }));

        let mut phase = SessionPhase::Active {
            since: Instant::now(),
        };
        assert!(phase.reject(RejectReason::AuthFailed).is_err());
    }

    #[test]
    fn terminal_close_is_final() {
        let mut phase = SessionPhase::Closed {
            reason: CloseReason::Remote,
        };
        assert!(phase.close(CloseReason::Local).is_err());
    }
}
