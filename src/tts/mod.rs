//! Text-to-speech providers.
//!
//! ```text
//! reply text ─▶ SpeechSynthesizer::stream_synthesize ─▶ SpeechChunk* ─▶ final marker
//! ```
//!
//! * [`ElevenLabsSynthesizer`]: streamed PCM from ElevenLabs.
//! * [`OpenAiSynthesizer`]: whole-body PCM from OpenAI, re-chunked.
//! * [`SilentSynthesizer`]: offline stub.

pub mod synth;

pub use synth::{
    ElevenLabsSynthesizer, OpenAiSynthesizer, SilentSynthesizer, SpeechChunk, SpeechStream,
    SpeechSynthesizer, TtsError,
};
