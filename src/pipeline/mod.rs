//! Voice loop orchestration.
//!
//! This module wires frames → utterances → transcript → dialog turn →
//! spoken reply, plus the background poll and idle timers.
//!
//! # Architecture
//!
//! ```text
//! AudioFrontend (mic callback / raw file)
//!        │ frames
//!        ▼
//! UtteranceSegmenter  Dormant ─wake─▶ Listening ─VAD─▶ InUtterance
//!        │ Utterance
//!        ▼
//! VoiceLoop::handle_utterance  ← sequential
//!        ├─ Transcriber → text
//!        ├─ Speaker::stop()            (barge-in)
//!        ├─ DialogManager::handle_user_text
//!        └─ Speaker::play(reply), IdleManager::touch()
//!
//! background_loop (every background_poll_ms)
//!        └─ DialogManager::poll_background → Speaker::play
//!
//! IdleManager (1 s tick) ── ask / suspend prompts via Speaker
//!        └─ on_suspend → segmenter back to Dormant
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voice_agent::audio::{AudioFrontend, BufferedAudioPlayer, NullSink, VadDetector};
//! use voice_agent::config::{PlaybackConfig, ToolConfig};
//! use voice_agent::dialog::{DialogManager, JsonlSessionStore};
//! use voice_agent::llm::EchoLlm;
//! use voice_agent::pipeline::{SpeechPlayer, UtteranceSegmenter, VoiceLoop};
//! use voice_agent::stt::EchoTranscriber;
//! use voice_agent::tools::ToolRunner;
//! use voice_agent::tts::SilentSynthesizer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dialog = Arc::new(DialogManager::new(
//!         Arc::new(EchoLlm::new(200)),
//!         Arc::new(ToolRunner::new(ToolConfig::default())),
//!         None,
//!         Arc::new(JsonlSessionStore::new("sessions.jsonl")),
//!         true,
//!     ));
//!     let player = Arc::new(BufferedAudioPlayer::new(Arc::new(NullSink), &PlaybackConfig::default()));
//!     let speaker = Arc::new(SpeechPlayer::new(Arc::new(SilentSynthesizer), player));
//!     let segmenter = UtteranceSegmenter::new(VadDetector::default(), None);
//!
//!     let voice = VoiceLoop::new(
//!         Arc::new(EchoTranscriber),
//!         dialog,
//!         speaker,
//!         segmenter,
//!         Duration::from_millis(500),
//!     );
//!
//!     let frontend = AudioFrontend::new();
//!     frontend.start();
//!     // frontend.enqueue_frame(Some(pcm)) from the capture side …
//!     voice.run(&frontend).await;
//! }
//! ```

pub mod idle;
pub mod speaker;
pub mod state;
pub mod voice_loop;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use idle::{IdleManager, IdleState, SuspendHook};
pub use speaker::{SpeechPlayer, Speaker};
pub use state::LoopState;
pub use voice_loop::{UtteranceSegmenter, VoiceLoop};
