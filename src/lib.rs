//! Real-time spoken-dialogue agent.
//!
//! Raw 16-bit PCM frames are segmented into utterances (energy VAD behind an
//! optional wake gate), transcribed, answered by a language model that may
//! run tools or spawn sub-agents, and spoken back through a paced playback
//! buffer that the user can interrupt by talking over it.
//!
//! ```text
//! mic / file ─▶ AudioFrontend ─▶ UtteranceSegmenter ─▶ Transcriber
//!                                                         │
//!        ToolRunner ◀── DialogManager ◀──────────────────┘
//!        SubAgentOrchestrator ◀─┘   │
//!                                   ▼
//!                     SpeechPlayer ─▶ BufferedAudioPlayer ─▶ AudioSink
//! ```

pub mod agents;
pub mod app;
pub mod audio;
pub mod config;
pub mod dialog;
pub mod llm;
pub mod pipeline;
pub mod stt;
pub mod tools;
pub mod tts;
