//! Voice loop: frames in, spoken replies out.
//!
//! [`UtteranceSegmenter`] turns frames into utterances (wake gate + VAD).
//! [`VoiceLoop`] handles each utterance and runs the background poll task.
//!
//! # Utterance flow
//!
//! ```text
//! Utterance
//!   └─▶ Transcriber::stream_transcribe → final text
//!         ├─ empty → discard
//!         └─▶ speaker.stop()                  (barge-in)
//!               └─▶ DialogManager::handle_user_text
//!                     └─▶ speaker.play(reply) → idle.touch()
//!
//! every background_poll_ms:
//!   DialogManager::poll_background → speaker.play(turn) for each turn
//! ```
//!
//! Utterances are handled strictly one after another; background turns may
//! interrupt a foreground reply because every `play` stops the previous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::audio::{AudioFrame, AudioFrontend, Utterance, VadDetector, WakeDetector};
use crate::dialog::{DialogManager, DialogTurn};
use crate::stt::{collect_final, Transcriber};

use super::idle::IdleManager;
use super::speaker::Speaker;
use super::state::LoopState;

// ---------------------------------------------------------------------------
// UtteranceSegmenter
// ---------------------------------------------------------------------------

/// Wake gate and VAD state machine over a frame sequence.
///
/// ```rust
/// use voice_agent::audio::{AudioFrame, VadDetector};
/// use voice_agent::pipeline::{LoopState, UtteranceSegmenter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut seg = UtteranceSegmenter::new(VadDetector::new(500, 1, 1), None);
/// assert_eq!(seg.state(), LoopState::Listening);
///
/// let loud = AudioFrame::new(1000i16.to_le_bytes().repeat(10));
/// let quiet = AudioFrame::new(vec![0; 20]);
/// assert!(seg.push(loud).await.is_none());
/// assert_eq!(seg.state(), LoopState::InUtterance);
/// let utterance = seg.push(quiet).await.unwrap();
/// assert_eq!(utterance.len(), 1);
/// # }
/// ```
pub struct UtteranceSegmenter {
    state: LoopState,
    vad: VadDetector,
    wake: Option<Box<dyn WakeDetector>>,
    frames: Vec<AudioFrame>,
    suspend: Arc<AtomicBool>,
}

impl UtteranceSegmenter {
    pub fn new(vad: VadDetector, wake: Option<Box<dyn WakeDetector>>) -> Self {
        let mut seg = Self {
            state: LoopState::initial(wake.is_some()),
            vad,
            wake,
            frames: Vec::new(),
            suspend: Arc::new(AtomicBool::new(false)),
        };
        seg.reset_detectors();
        seg
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Flag that, once set, sends the segmenter back to `Dormant` on the
    /// next frame.  Used as the idle manager's suspend hook.
    pub fn suspend_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.suspend)
    }

    /// Drop any partial utterance and return to `Dormant`.
    ///
    /// Without a wake detector there is no dormant state to return to, so
    /// suspending is a no-op and a partial utterance is kept.
    pub fn suspend(&mut self) {
        if self.wake.is_none() {
            log::debug!("segmenter: no wake gate, suspend ignored in {}", self.state);
            return;
        }
        self.frames.clear();
        self.state = LoopState::initial(self.wake.is_some());
        self.reset_detectors();
        log::debug!("segmenter: suspended → {}", self.state);
    }

    /// Feed one frame; returns a completed utterance when one ends.
    pub async fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        if self.suspend.swap(false, Ordering::SeqCst) {
            self.suspend();
        }

        if self.state == LoopState::Dormant {
            if let Some(wake) = self.wake.as_mut() {
                if wake.process(&frame).await {
                    log::debug!("segmenter: wake gate opened");
                    self.state = LoopState::Listening;
                    self.reset_detectors();
                }
                return None;
            }
            self.state = LoopState::Listening;
        }

        if self.vad.is_speech(&frame) {
            self.frames.push(frame);
            self.state = LoopState::InUtterance;
            return None;
        }

        if self.frames.is_empty() {
            return None;
        }
        Some(self.complete())
    }

    /// End of input: flush whatever has accumulated.
    pub fn finish(&mut self) -> Option<Utterance> {
        if self.frames.is_empty() {
            return None;
        }
        Some(self.complete())
    }

    fn complete(&mut self) -> Utterance {
        let utterance = Utterance {
            frames: std::mem::take(&mut self.frames),
        };
        self.state = LoopState::initial(self.wake.is_some());
        self.reset_detectors();
        log::debug!(
            "segmenter: utterance of {} frames → {}",
            utterance.len(),
            self.state
        );
        utterance
    }

    fn reset_detectors(&mut self) {
        self.vad.reset();
        if let Some(wake) = self.wake.as_mut() {
            wake.reset();
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceLoop
// ---------------------------------------------------------------------------

/// Composes segmentation, transcription, dialog and playback.
pub struct VoiceLoop {
    transcriber: Arc<dyn Transcriber>,
    dialog: Arc<DialogManager>,
    speaker: Arc<dyn Speaker>,
    idle: Option<Arc<IdleManager>>,
    segmenter: Mutex<UtteranceSegmenter>,
    poll_interval: Duration,
    turns_tx: Option<mpsc::UnboundedSender<DialogTurn>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceLoop {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        dialog: Arc<DialogManager>,
        speaker: Arc<dyn Speaker>,
        segmenter: UtteranceSegmenter,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transcriber,
            dialog,
            speaker,
            idle: None,
            segmenter: Mutex::new(segmenter),
            poll_interval,
            turns_tx: None,
            poll_task: Mutex::new(None),
        }
    }

    /// Attach an idle manager; it is started and stopped with the loop and
    /// touched after every spoken turn.
    pub fn with_idle(mut self, idle: Arc<IdleManager>) -> Self {
        self.idle = Some(idle);
        self
    }

    /// Copy every completed turn (foreground and background) to `tx`.
    pub fn with_turn_channel(mut self, tx: mpsc::UnboundedSender<DialogTurn>) -> Self {
        self.turns_tx = Some(tx);
        self
    }

    pub async fn state(&self) -> LoopState {
        self.segmenter.lock().await.state()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the background poll task and the idle timer.
    pub async fn start(&self) {
        let mut slot = self.poll_task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(background_loop(
            Arc::clone(&self.dialog),
            Arc::clone(&self.speaker),
            self.idle.clone(),
            self.turns_tx.clone(),
            self.poll_interval,
        )));
        drop(slot);

        if let Some(idle) = &self.idle {
            idle.start().await;
        }
        log::info!("voice loop: started");
    }

    /// Stop polling, the idle timer and playback.  Idempotent.
    pub async fn stop(&self) {
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(idle) = &self.idle {
            idle.stop().await;
        }
        self.speaker.stop().await;
        log::info!("voice loop: stopped");
    }

    /// Drive the loop from `frontend` until it is stopped.
    ///
    /// Each end-of-utterance sentinel flushes the utterance in progress.
    pub async fn run(&self, frontend: &AudioFrontend) {
        self.start().await;
        loop {
            let mut frames = frontend.frames();
            while let Some(frame) = frames.next().await {
                self.push_frame(frame).await;
            }
            drop(frames);

            let pending = self.segmenter.lock().await.finish();
            if let Some(utterance) = pending {
                self.handle_utterance(utterance).await;
            }
            if !frontend.is_running() {
                break;
            }
        }
        self.speaker.wait_idle().await;
        self.stop().await;
    }

    // -----------------------------------------------------------------------
    // Frame / utterance handling
    // -----------------------------------------------------------------------

    /// Feed one frame; handles the utterance it completes, if any.
    pub async fn push_frame(&self, frame: AudioFrame) -> Option<DialogTurn> {
        let utterance = self.segmenter.lock().await.push(frame).await?;
        self.handle_utterance(utterance).await
    }

    /// Transcribe, barge in, run one dialog turn and speak the reply.
    pub async fn handle_utterance(&self, utterance: Utterance) -> Option<DialogTurn> {
        // ── 1. Transcribe ──────────────────────────────────────────────────
        let frames = futures::stream::iter(utterance.frames).boxed();
        let text = match collect_final(self.transcriber.stream_transcribe(frames)).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("voice loop: transcription failed: {e}");
                return None;
            }
        };
        if text.is_empty() {
            log::debug!("voice loop: empty transcript, discarding utterance");
            return None;
        }
        log::info!("voice loop: heard {text:?}");

        // ── 2. Barge-in ────────────────────────────────────────────────────
        self.speaker.stop().await;

        // ── 3. Dialog turn ─────────────────────────────────────────────────
        let turn = self.dialog.handle_user_text(&text).await;

        // ── 4. Speak ───────────────────────────────────────────────────────
        self.speaker.play(&turn.response_text).await;
        if let Some(idle) = &self.idle {
            idle.touch();
        }
        if let Some(tx) = &self.turns_tx {
            let _ = tx.send(turn.clone());
        }
        Some(turn)
    }
}

async fn background_loop(
    dialog: Arc<DialogManager>,
    speaker: Arc<dyn Speaker>,
    idle: Option<Arc<IdleManager>>,
    turns_tx: Option<mpsc::UnboundedSender<DialogTurn>>,
    poll_interval: Duration,
) {
    loop {
        for turn in dialog.poll_background().await {
            log::info!("voice loop: background turn {:?}", turn.user_text);
            speaker.play(&turn.response_text).await;
            if let Some(idle) = &idle {
                idle.touch();
            }
            if let Some(tx) = &turns_tx {
                let _ = tx.send(turn);
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
