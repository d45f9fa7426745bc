//! Input events carried on the reliable Input channel.
//!
//! Events are transient: serialized at capture, injected on arrival,
//! never persisted. The capture timestamp survives the trip so the
//! viewer can measure capture-to-confirmed-injection latency.

use serde::{Deserialize, Serialize};

use crate::error::GlintError;

// ── Buttons / actions ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonAction {
    Press,
    Release,
}

// ── InputAction ──────────────────────────────────────────────────

/// What the remote user did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputAction {
    /// Absolute cursor move in source-frame coordinates.
    MouseMove { x: i32, y: i32 },
    /// Button press or release at the given position.
    MouseButton {
        button: MouseButton,
        action: ButtonAction,
        x: i32,
        y: i32,
    },
    KeyPress { keycode: u32 },
    KeyRelease { keycode: u32 },
    Scroll { delta_x: i32, delta_y: i32 },
    /// A string typed as a unit.
    TypeText { text: String },
    /// A chord pressed together and released in reverse order.
    Hotkey { keycodes: Vec<u32> },
}

// ── InputEvent ───────────────────────────────────────────────────

/// One input event with its capture timestamp and origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub action: InputAction,
    /// Microseconds on the sender's session clock at capture time.
    pub timestamp_us: u64,
    /// The session this event originated from.
    pub session_id: u64,
}

impl InputEvent {
    pub fn new(action: InputAction, timestamp_us: u64, session_id: u64) -> Self {
        Self {
            action,
            timestamp_us,
            session_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, GlintError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlintError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────
