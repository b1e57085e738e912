//! Energy-based Voice Activity Detection (VAD) with hysteresis.
//!
//! [`VadDetector`] classifies one 16-bit PCM frame at a time.  A frame is
//! *loud* when its RMS energy reaches the threshold.  Speech is only
//! reported after `speech_frames` loud frames, and the loud count is only
//! cleared after `silence_frames` consecutive quiet frames, so a short
//! pause inside a word does not split the utterance.
//!
//! ## Algorithm
//!
//! ```text
//! loud  → speech_count += 1, silence_count = 0
//! quiet → silence_count += 1
//! speaking = speech_count >= speech_frames
//! silence_count >= silence_frames → speech_count = 0
//! ```
//!
//! `speaking` is computed *before* the silence reset, so the frame that
//! completes the silence run still reports the previous speech state.

use crate::config::VadConfig;

use super::frame::AudioFrame;

// ---------------------------------------------------------------------------
// VadDetector
// ---------------------------------------------------------------------------

/// Frame-by-frame energy classifier.
///
/// # Example
///
/// ```rust
/// use voice_agent::audio::{AudioFrame, VadDetector};
///
/// let mut vad = VadDetector::new(500, 3, 5);
/// let loud = AudioFrame::new(600_i16.to_le_bytes().repeat(480));
/// let quiet = AudioFrame::new(100_i16.to_le_bytes().repeat(480));
///
/// assert!(!vad.is_speech(&loud));
/// assert!(!vad.is_speech(&loud));
/// assert!(vad.is_speech(&loud));
/// assert!(vad.is_speech(&quiet)); // hysteresis keeps us in speech
/// ```
#[derive(Debug, Clone)]
pub struct VadDetector {
    /// RMS energy (16-bit sample units) at or above which a frame is loud.
    threshold: f64,
    speech_frames: u32,
    silence_frames: u32,
    speech_count: u32,
    silence_count: u32,
}

impl VadDetector {
    pub fn new(threshold: u32, speech_frames: u32, silence_frames: u32) -> Self {
        Self {
            threshold: threshold as f64,
            speech_frames,
            silence_frames,
            speech_count: 0,
            silence_count: 0,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config.threshold, config.speech_frames, config.silence_frames)
    }

    /// Classify one frame, updating the hysteresis counters.
    pub fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        if frame.rms() >= self.threshold {
            self.speech_count = self.speech_count.saturating_add(1);
            self.silence_count = 0;
        } else {
            self.silence_count = self.silence_count.saturating_add(1);
        }

        let speaking = self.speech_count >= self.speech_frames;

        if self.silence_count >= self.silence_frames {
            self.speech_count = 0;
        }
        speaking
    }

    /// Clear both counters.
    pub fn reset(&mut self) {
        self.speech_count = 0;
        self.silence_count = 0;
    }

    /// RMS threshold currently in use.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for VadDetector {
    fn default() -> Self {
        Self::from_config(&VadConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(level: i16) -> AudioFrame {
        AudioFrame::new(level.to_le_bytes().repeat(480))
    }

    #[test]
    fn three_loud_then_one_quiet() {
        let mut vad = VadDetector::new(500, 3, 5);
        let got: Vec<bool> = [600, 600, 600, 100]
            .iter()
            .map(|&l| vad.is_speech(&frame(l)))
            .collect();
        assert_eq!(got, vec![false, false, true, true]);
    }

    #[test]
    fn silence_run_clears_speech() {
        let mut vad = VadDetector::new(500, 3, 5);
        for _ in 0..3 {
            vad.is_speech(&frame(600));
        }
        // Quiet frames 1..=4 still report speech; the 5th reports the old
        // state and then clears the counter.
        for _ in 0..5 {
            assert!(vad.is_speech(&frame(0)));
        }
        assert!(!vad.is_speech(&frame(0)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut vad = VadDetector::new(500, 1, 5);
        assert!(vad.is_speech(&frame(500)));
    }

    #[test]
    fn empty_frame_is_quiet() {
        let mut vad = VadDetector::new(500, 1, 1);
        assert!(!vad.is_speech(&AudioFrame::new(Vec::new())));
    }

    #[test]
    fn reset_clears_counters() {
        let mut vad = VadDetector::new(500, 2, 5);
        vad.is_speech(&frame(600));
        vad.is_speech(&frame(600));
        vad.reset();
        assert!(!vad.is_speech(&frame(600)));
    }

    #[test]
    fn default_uses_config_defaults() {
        let vad = VadDetector::default();
        assert_eq!(vad.threshold(), 500.0);
    }
}
