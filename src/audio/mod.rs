//! Audio front end and playback.
//!
//! # Capture side
//!
//! ```text
//! mic callback / raw file → AudioFrontend (unbounded queue)
//!   → WakeDetector (dormant) → VadDetector (listening) → Utterance
//! ```
//!
//! # Playback side
//!
//! ```text
//! synthesized chunks → BufferedAudioPlayer (min-buffer pacing) → AudioSink
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use voice_agent::audio::{AudioFrame, VadDetector};
//!
//! let mut vad = VadDetector::new(500, 3, 5);
//! let frame = AudioFrame::new(vec![0u8; 960]);
//! assert!(!vad.is_speech(&frame));
//! ```

#[cfg(feature = "device")]
pub mod device;
pub mod frame;
pub mod player;
pub mod sink;
pub mod vad;
pub mod wake;

#[cfg(feature = "device")]
pub use device::{DeviceError, MicCapture, SpeakerSink, StreamHandle};
pub use frame::{rms_s16le, AudioFrame, AudioFrontend, Utterance};
pub use player::BufferedAudioPlayer;
pub use sink::{AudioSink, FileSink, NullSink, SinkError};
pub use vad::VadDetector;
pub use wake::{EnergyWakeDetector, ManualWakeDetector, WakeDetector};
