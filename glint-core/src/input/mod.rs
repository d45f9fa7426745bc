//! Host-side input injection.
//!
//! Events arrive on the reliable-ordered Input channel and are applied
//! strictly in arrival order. Injection failures — out-of-bounds
//! coordinates, keycodes the OS backend cannot map — are logged and
//! skipped; they never crash or stall the pipeline.
//!
//! The OS-level work is behind [`OSInputBackend`], an external
//! collaborator (Win32 `SendInput`, X11 test-fake, uinput, ...).

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::GlintError;
use crate::protocol::input::InputEvent;
use crate::session::SessionMetrics;

// ── OSInputBackend ───────────────────────────────────────────────

/// Collaborator performing the actual OS input action.
pub trait OSInputBackend: Send + Sync {
    /// Perform the event. Errors are reported, not thrown past the
    /// injector.
    fn inject(&self, event: &InputEvent) -> Result<(), GlintError>;
}

// ── InputInjector ────────────────────────────────────────────────

/// Applies remote input events in order, absorbing per-event failures.
pub struct InputInjector {
    backend: Arc<dyn OSInputBackend>,
    metrics: Arc<SessionMetrics>,
}

impl InputInjector {
    pub fn new(backend: Arc<dyn OSInputBackend>, metrics: Arc<SessionMetrics>) -> Self {
        Self { backend, metrics }
    }

    /// Inject one event. Returns whether it was applied; a failed event
    /// is logged, counted, and skipped.
    pub fn apply(&self, event: &InputEvent) -> bool {
        match self.backend.inject(event) {
            Ok(()) => {
                SessionMetrics::bump(&self.metrics.input_injected);
                true
            }
            Err(e) => {
                warn!(error = %e, action = ?event.action, "skipping input event");
                SessionMetrics::bump(&self.metrics.input_skipped);
                false
            }
        }
    }
}

// ── Test backends ────────────────────────────────────────────────

/// Records every injected event; the standard test double.
#[derive(Default)]
pub struct RecordingBackend {
    events: Mutex<Vec<InputEvent>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded(&self) -> Vec<InputEvent> {
        self.events.lock().expect("recording backend poisoned").clone()
    }
}

impl OSInputBackend for RecordingBackend {
    fn inject(&self, event: &InputEvent) -> Result<(), GlintError> {
        self.events
            .lock()
            .expect("recording backend poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Rejects every event; exercises the log-and-skip path.
pub struct FailingBackend;

impl OSInputBackend for FailingBackend {
    fn inject(&self, event: &InputEvent) -> Result<(), GlintError> {
        Err(GlintError::InjectionFailure(format!(
            "unsupported action: {:?}",
            event.action
        )))
    }
}

// ── Tests ────────────────────────────────────────────────────────
