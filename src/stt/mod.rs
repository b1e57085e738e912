//! STT (Speech-to-Text) module.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Transcriber (trait)                  │
//! │                                                      │
//! │   Utterance frames ──▶ stream_transcribe()           │
//! │                          │                           │
//! │        ┌─────────────────┴──────────────┐            │
//! │        ▼                                ▼            │
//! │  WhisperApiTranscriber           EchoTranscriber     │
//! │  PCM → WAV → multipart POST      "captured N …"      │
//! │        │                                │            │
//! │        └──────▶ TranscriptChunk stream ◀┘            │
//! │                  (last is_final)                     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use voice_agent::audio::AudioFrame;
//! use voice_agent::stt::{collect_final, EchoTranscriber, Transcriber};
//!
//! # async fn demo() {
//! let frames = futures::stream::iter(vec![AudioFrame::new(vec![0; 960])]).boxed();
//! let text = collect_final(EchoTranscriber.stream_transcribe(frames)).await.unwrap();
//! assert_eq!(text, "captured 1 audio chunks");
//! # }
//! ```

pub mod engine;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{
    collect_final, pcm_to_wav, EchoTranscriber, ElevenLabsTranscriber, SttError, TranscriptChunk, TranscriptStream,
    Transcriber, WhisperApiTranscriber,
};
