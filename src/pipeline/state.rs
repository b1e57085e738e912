//! Voice loop state machine.
//!
//! [`LoopState`] is what the segmenter is doing with incoming frames.
//!
//! ```text
//!            wake detector fires
//! Dormant ───────────────────────▶ Listening ◀──────────────┐
//!    ▲                               │ first speaking frame │
//!    │                               ▼                      │
//!    └── utterance handled ──── InUtterance ── utterance ───┘
//!        (wake detector present)               handled (no wake detector)
//! ```
//!
//! `on_suspend` from the idle manager also sends the loop back to `Dormant`
//! when a wake detector is configured.

use std::fmt;

/// States of the voice loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Waiting for the wake gate; frames only reach the wake detector.
    Dormant,

    /// Frames run through the VAD; nothing accumulated yet.
    Listening,

    /// The VAD reports speech; frames are being accumulated.
    InUtterance,
}

impl LoopState {
    /// Initial state: `Dormant` when a wake detector gates the loop.
    ///
    /// ```
    /// use voice_agent::pipeline::LoopState;
    ///
    /// assert_eq!(LoopState::initial(true), LoopState::Dormant);
    /// assert_eq!(LoopState::initial(false), LoopState::Listening);
    /// ```
    pub fn initial(has_wake_detector: bool) -> Self {
        if has_wake_detector {
            LoopState::Dormant
        } else {
            LoopState::Listening
        }
    }

    /// `true` while frames are being collected into an utterance.
    ///
    /// ```
    /// use voice_agent::pipeline::LoopState;
    ///
    /// assert!(!LoopState::Dormant.is_busy());
    /// assert!(!LoopState::Listening.is_busy());
    /// assert!(LoopState::InUtterance.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, LoopState::InUtterance)
    }

    /// Short label for logs and the CLI prompt.
    pub fn label(&self) -> &'static str {
        match self {
            LoopState::Dormant => "Dormant",
            LoopState::Listening => "Listening",
            LoopState::InUtterance => "Hearing",
        }
    }
}

impl Default for LoopState {
    fn default() -> Self {
        LoopState::Listening
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
