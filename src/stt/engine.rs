//! Core transcription trait and implementations.
//!
//! # Overview
//!
//! [`Transcriber`] is the interface used by the voice loop.  It is
//! object-safe and `Send + Sync` so it can be held behind an
//! `Arc<dyn Transcriber>`.  Frames go in as a stream; transcript chunks come
//! out as a stream whose last item has `is_final = true`.
//!
//! [`WhisperApiTranscriber`] posts the utterance as a WAV file to an
//! OpenAI-compatible `/v1/audio/transcriptions` endpoint;
//! [`ElevenLabsTranscriber`] posts it to ElevenLabs `/v1/speech-to-text`.
//!
//! [`EchoTranscriber`] needs no network: it reports how many frames it
//! heard, which is enough to drive the loop end-to-end offline.

use std::future::Future;
use std::io::Cursor;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use thiserror::Error;

use crate::audio::AudioFrame;
use crate::config::SttConfig;

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

/// All errors that can arise from the STT subsystem.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// HTTP transport error.
    #[error("transcription request failed: {0}")]
    Request(String),

    /// Non-2xx response from the provider.
    #[error("transcription endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("failed to parse transcription response: {0}")]
    Parse(String),

    /// PCM could not be wrapped as WAV.
    #[error("failed to encode audio: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for SttError {
    fn from(e: reqwest::Error) -> Self {
        SttError::Request(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// TranscriptChunk
// ---------------------------------------------------------------------------

/// One piece of transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChunk {
    pub text: String,
    /// The last chunk of an utterance.
    pub is_final: bool,
}

impl TranscriptChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

pub type TranscriptStream = BoxStream<'static, Result<TranscriptChunk, SttError>>;

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for speech-to-text providers.
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance's frames.
    fn stream_transcribe(&self, frames: BoxStream<'static, AudioFrame>) -> TranscriptStream;
}

/// Drain a transcript stream and return the final text (trimmed).
///
/// The last `is_final` chunk wins; a stream without one yields the last
/// chunk seen, and an empty stream yields an empty string.
pub async fn collect_final(mut chunks: TranscriptStream) -> Result<String, SttError> {
    let mut last = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let done = chunk.is_final;
        last = chunk.text;
        if done {
            break;
        }
    }
    Ok(last.trim().to_string())
}

// ---------------------------------------------------------------------------
// EchoTranscriber
// ---------------------------------------------------------------------------

/// Offline stand-in: `"captured N audio chunks"`, one partial per frame,
/// then a final chunk.
#[derive(Debug, Default)]
pub struct EchoTranscriber;

fn captured(n: usize) -> String {
    format!("captured {n} audio chunks")
}

impl Transcriber for EchoTranscriber {
    fn stream_transcribe(&self, frames: BoxStream<'static, AudioFrame>) -> TranscriptStream {
        let partials = frames
            .enumerate()
            .map(|(i, _)| Ok(TranscriptChunk::partial(captured(i + 1))));
        // The final chunk needs the total, which is only known at the end.
        stream::unfold(
            (partials, 0usize, false),
            |(mut partials, seen, done)| async move {
                if done {
                    return None;
                }
                match partials.next().await {
                    Some(item) => Some((item, (partials, seen + 1, false))),
                    None => Some((
                        Ok(TranscriptChunk::final_text(captured(seen))),
                        (partials, seen, true),
                    )),
                }
            },
        )
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// WhisperApiTranscriber
// ---------------------------------------------------------------------------

/// Wrap 16-bit mono PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| SttError::Encode(e.to_string()))?;
        for b in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([b[0], b[1]]))
                .map_err(|e| SttError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| SttError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Posts each utterance to `/v1/audio/transcriptions` as `audio.wav`.
#[derive(Clone)]
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    config: SttConfig,
    sample_rate: u32,
}

impl WhisperApiTranscriber {
    pub fn new(config: &SttConfig, sample_rate: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config: config.clone(),
            sample_rate,
        }
    }

    async fn send(&self, wav: Vec<u8>) -> Result<String, SttError> {
        let url = format!(
            "{}/v1/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        );
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.config.model.clone())
            .part("file", file);
        if let Some(lang) = &self.config.language {
            form = form.text("language", lang.clone());
        }

        let mut req = self.client.post(&url).multipart(form);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }

        read_text(req.send().await?).await
    }
}

impl Transcriber for WhisperApiTranscriber {
    fn stream_transcribe(&self, frames: BoxStream<'static, AudioFrame>) -> TranscriptStream {
        let this = self.clone();
        post_utterance(frames, self.sample_rate, move |wav| async move {
            this.send(wav).await
        })
    }
}

// ---------------------------------------------------------------------------
// ElevenLabsTranscriber
// ---------------------------------------------------------------------------

/// Posts each utterance to ElevenLabs `/v1/speech-to-text`.
#[derive(Clone)]
pub struct ElevenLabsTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
    sample_rate: u32,
}

impl ElevenLabsTranscriber {
    const BASE_URL: &'static str = "https://api.elevenlabs.io";
    const MODEL: &'static str = "scribe_v1";

    pub fn new(config: &SttConfig, api_key: &str, sample_rate: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let base_url = if config.base_url == SttConfig::WHISPER_BASE_URL {
            Self::BASE_URL.to_string()
        } else {
            config.base_url.clone()
        };
        let model = if config.model == SttConfig::WHISPER_MODEL {
            Self::MODEL.to_string()
        } else {
            config.model.clone()
        };
        Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            model,
            language: config.language.clone(),
            sample_rate,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/speech-to-text", self.base_url.trim_end_matches('/'))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, wav: Vec<u8>) -> Result<String, SttError> {
        let audio = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model_id", self.model.clone())
            .part("audio", audio);
        if let Some(lang) = &self.language {
            form = form.text("language_code", lang.clone());
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        read_text(response).await
    }
}

impl Transcriber for ElevenLabsTranscriber {
    fn stream_transcribe(&self, frames: BoxStream<'static, AudioFrame>) -> TranscriptStream {
        let this = self.clone();
        post_utterance(frames, self.sample_rate, move |wav| async move {
            this.send(wav).await
        })
    }
}

// ---------------------------------------------------------------------------
// Shared upload path
// ---------------------------------------------------------------------------

/// Collect the utterance, wrap it as WAV and upload it once with `send`.
/// An empty utterance yields no chunks.
fn post_utterance<F, Fut>(
    frames: BoxStream<'static, AudioFrame>,
    sample_rate: u32,
    send: F,
) -> TranscriptStream
where
    F: FnOnce(Vec<u8>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<String, SttError>> + Send + 'static,
{
    stream::once(async move {
        let pcm: Vec<u8> = frames.map(|f| f.data).concat().await;
        if pcm.is_empty() {
            return None;
        }
        log::debug!("stt: sending {} bytes of audio", pcm.len());
        let wav = match pcm_to_wav(&pcm, sample_rate) {
            Ok(wav) => wav,
            Err(e) => return Some(Err(e)),
        };
        Some(send(wav).await.map(TranscriptChunk::final_text))
    })
    .filter_map(futures::future::ready)
    .boxed()
}

/// `text` field of a successful JSON response.
async fn read_text(response: reqwest::Response) -> Result<String, SttError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SttError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| SttError::Parse(e.to_string()))?;
    Ok(json["text"].as_str().unwrap_or("").to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
