//! Speech synthesis trait and providers.
//!
//! Every provider returns raw 16-bit mono PCM at the playback sample rate
//! (24 kHz by default) so chunks can go straight to the
//! [`BufferedAudioPlayer`](crate::audio::BufferedAudioPlayer).  The stream
//! always ends with an `is_final` chunk.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use thiserror::Error;

use crate::config::TtsConfig;

/// Size of the pieces a whole-body response is re-chunked into.
const CHUNK_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// TtsError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        TtsError::Request(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// SpeechChunk / trait
// ---------------------------------------------------------------------------

/// A piece of synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechChunk {
    pub audio: Vec<u8>,
    pub is_final: bool,
}

impl SpeechChunk {
    pub fn audio(audio: Vec<u8>) -> Self {
        Self {
            audio,
            is_final: false,
        }
    }

    /// Empty end-of-stream marker.
    pub fn end() -> Self {
        Self {
            audio: Vec::new(),
            is_final: true,
        }
    }
}

pub type SpeechStream = BoxStream<'static, Result<SpeechChunk, TtsError>>;

/// Object-safe text-to-speech provider.
pub trait SpeechSynthesizer: Send + Sync {
    fn stream_synthesize(&self, text: &str) -> SpeechStream;
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, TtsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TtsError::Status {
        status: status.as_u16(),
        body,
    })
}

// ---------------------------------------------------------------------------
// SilentSynthesizer
// ---------------------------------------------------------------------------

/// Offline stand-in: the "audio" is the UTF-8 text itself, in one final chunk.
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn stream_synthesize(&self, text: &str) -> SpeechStream {
        let chunk = SpeechChunk {
            audio: text.as_bytes().to_vec(),
            is_final: true,
        };
        stream::once(async move { Ok(chunk) }).boxed()
    }
}

// ---------------------------------------------------------------------------
// OpenAiSynthesizer
// ---------------------------------------------------------------------------

/// `/v1/audio/speech` with `response_format = "pcm"`.
///
/// The endpoint returns the whole body at once; it is split into 4 KiB
/// chunks for smoother pacing.
#[derive(Clone)]
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiSynthesizer {
    pub fn new(config: &TtsConfig, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
            api_key: api_key.to_string(),
            model: config.model.clone().unwrap_or_else(|| "tts-1".into()),
            voice: config.voice.clone().unwrap_or_else(|| "alloy".into()),
        }
    }

    async fn synthesize(&self, text: String) -> Result<Vec<u8>, TtsError> {
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "pcm",
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?.to_vec())
    }
}

/// Split `audio` into `CHUNK_BYTES` pieces followed by the end marker.
fn rechunk(audio: Vec<u8>) -> Vec<Result<SpeechChunk, TtsError>> {
    audio
        .chunks(CHUNK_BYTES)
        .map(|c| Ok(SpeechChunk::audio(c.to_vec())))
        .chain(std::iter::once(Ok(SpeechChunk::end())))
        .collect()
}

impl SpeechSynthesizer for OpenAiSynthesizer {
    fn stream_synthesize(&self, text: &str) -> SpeechStream {
        let this = self.clone();
        let text = text.to_string();
        stream::once(async move { this.synthesize(text).await })
            .flat_map(|result| match result {
                Ok(audio) => stream::iter(rechunk(audio)),
                Err(e) => stream::iter(vec![Err(e)]),
            })
            .boxed()
    }
}

// ---------------------------------------------------------------------------
// ElevenLabsSynthesizer
// ---------------------------------------------------------------------------

/// ElevenLabs streaming endpoint with `output_format = pcm_<rate>`.
#[derive(Clone)]
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    sample_rate: u32,
}

impl ElevenLabsSynthesizer {
    /// A well-known stock voice used when none is configured.
    const DEFAULT_VOICE: &'static str = "21m00Tcm4TlvDq8ikWAM";

    pub fn new(config: &TtsConfig, api_key: &str, sample_rate: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.elevenlabs.io".into()),
            api_key: api_key.to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "eleven_multilingual_v2".into()),
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_VOICE.into()),
            sample_rate,
        }
    }

    async fn open(&self, text: String) -> Result<reqwest::Response, TtsError> {
        let url = format!(
            "{}/v1/text-to-speech/{}/stream",
            self.base_url.trim_end_matches('/'),
            self.voice
        );
        let response = self
            .client
            .post(&url)
            .query(&[("output_format", format!("pcm_{}", self.sample_rate))])
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({ "text": text, "model_id": self.model }))
            .send()
            .await?;
        check(response).await
    }
}

impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn stream_synthesize(&self, text: &str) -> SpeechStream {
        let this = self.clone();
        let text = text.to_string();
        stream::once(async move { this.open(text).await })
            .flat_map(|opened| match opened {
                Ok(response) => response
                    .bytes_stream()
                    .map(|bytes| {
                        bytes
                            .map(|b| SpeechChunk::audio(b.to_vec()))
                            .map_err(TtsError::from)
                    })
                    .chain(stream::once(async { Ok(SpeechChunk::end()) }))
                    .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_yields_text_bytes_as_final() {
        let chunks: Vec<_> = SilentSynthesizer
            .stream_synthesize("hi")
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.audio, b"hi".to_vec());
        assert!(chunk.is_final);
    }

    #[test]
    fn rechunk_splits_and_terminates() {
        let chunks = rechunk(vec![0u8; CHUNK_BYTES * 2 + 10]);
        let sizes: Vec<(usize, bool)> = chunks
            .into_iter()
            .map(|c| {
                let c = c.unwrap();
                (c.audio.len(), c.is_final)
            })
            .collect();
        assert_eq!(
            sizes,
            vec![
                (CHUNK_BYTES, false),
                (CHUNK_BYTES, false),
                (10, false),
                (0, true)
            ]
        );
    }

    #[test]
    fn rechunk_of_empty_body_is_just_the_marker() {
        let chunks = rechunk(Vec::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &SpeechChunk::end());
    }

    #[test]
    fn provider_defaults_apply() {
        let config = TtsConfig::default();
        let openai = OpenAiSynthesizer::new(&config, "k");
        assert_eq!(openai.voice, "alloy");
        assert_eq!(openai.base_url, "https://api.openai.com");

        let eleven = ElevenLabsSynthesizer::new(&config, "k", 24_000);
        assert_eq!(eleven.model, "eleven_multilingual_v2");
        assert_eq!(eleven.sample_rate, 24_000);
    }

    #[test]
    fn synthesizer_is_object_safe() {
        let s: Box<dyn SpeechSynthesizer> = Box::new(SilentSynthesizer);
        drop(s);
    }
}
