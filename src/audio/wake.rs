//! Wake gate: decides when a dormant voice loop starts listening.
//!
//! Two detectors implement [`WakeDetector`]:
//!
//! * [`EnergyWakeDetector`]: wakes on N consecutive loud frames.
//! * [`ManualWakeDetector`]: a latch armed from outside (push-to-talk,
//!   CLI command); returns `true` once per arming.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::config::WakeConfig;

use super::frame::AudioFrame;

// ---------------------------------------------------------------------------
// WakeDetector trait
// ---------------------------------------------------------------------------

/// Object-safe wake gate.
#[async_trait]
pub trait WakeDetector: Send + Sync {
    /// Feed one frame; `true` means "wake now".
    async fn process(&mut self, frame: &AudioFrame) -> bool;

    /// Return to the initial state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// EnergyWakeDetector
// ---------------------------------------------------------------------------

/// Wakes on `consecutive` loud frames in a row.
///
/// The counter keeps counting past the threshold, so only the frame that
/// *reaches* it returns `true`.  A quiet frame or [`reset`](WakeDetector::reset)
/// starts over.  A `consecutive` of zero is treated as one.
#[derive(Debug, Clone)]
pub struct EnergyWakeDetector {
    threshold: f64,
    consecutive: u32,
    count: u32,
}

impl EnergyWakeDetector {
    pub fn new(threshold: u32, consecutive: u32) -> Self {
        Self {
            threshold: threshold as f64,
            consecutive: consecutive.max(1),
            count: 0,
        }
    }

    pub fn from_config(config: &WakeConfig) -> Self {
        Self::new(config.threshold, config.consecutive)
    }
}

#[async_trait]
impl WakeDetector for EnergyWakeDetector {
    async fn process(&mut self, frame: &AudioFrame) -> bool {
        if frame.rms() >= self.threshold {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.count == self.consecutive
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

// ---------------------------------------------------------------------------
// ManualWakeDetector
// ---------------------------------------------------------------------------

/// Single-shot latch.  Starts armed; [`arm`](Self::arm) re-arms it.
#[derive(Debug)]
pub struct ManualWakeDetector {
    armed: AtomicBool,
}

impl ManualWakeDetector {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Default for ManualWakeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WakeDetector for ManualWakeDetector {
    async fn process(&mut self, _frame: &AudioFrame) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }

    fn reset(&mut self) {
        self.armed.store(true, Ordering::SeqCst);
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

    #[tokio::test]
    async fn fifth_loud_frame_wakes_exactly_once() {
        let mut wake = EnergyWakeDetector::new(1200, 5);
        let mut hits = Vec::new();
        for _ in 0..8 {
            hits.push(wake.process(&frame(2000)).await);
        }
        assert_eq!(
            hits,
            vec![false, false, false, false, true, false, false, false]
        );

        wake.reset();
        for _ in 0..4 {
            assert!(!wake.process(&frame(2000)).await);
        }
        assert!(wake.process(&frame(2000)).await);
    }

    #[tokio::test]
    async fn quiet_frame_restarts_the_run() {
        let mut wake = EnergyWakeDetector::new(1200, 3);
        assert!(!wake.process(&frame(2000)).await);
        assert!(!wake.process(&frame(2000)).await);
        assert!(!wake.process(&frame(10)).await);
        assert!(!wake.process(&frame(2000)).await);
        assert!(!wake.process(&frame(2000)).await);
        assert!(wake.process(&frame(2000)).await);
    }

    #[tokio::test]
    async fn zero_consecutive_wakes_on_first_loud_frame() {
        let mut wake = EnergyWakeDetector::new(1200, 0);
        assert!(!wake.process(&frame(10)).await);
        assert!(wake.process(&frame(2000)).await);
        assert!(!wake.process(&frame(2000)).await);
    }

    #[tokio::test]
    async fn manual_latch_fires_once_per_arming() {
        let mut wake = ManualWakeDetector::new();
        assert!(wake.process(&frame(0)).await);
        assert!(!wake.process(&frame(0)).await);

        wake.arm();
        assert!(wake.process(&frame(0)).await);
        assert!(!wake.process(&frame(0)).await);

        wake.reset();
        assert!(wake.process(&frame(0)).await);
    }

    #[test]
    fn wake_detector_is_object_safe() {
        let det: Box<dyn WakeDetector> = Box::new(EnergyWakeDetector::new(1, 1));
        drop(det);
    }
}
