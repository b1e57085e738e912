//! Application settings structs, defaults, TOML persistence and `VA_*`
//! environment overrides.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]` so a partial `settings.toml` only
//! needs to name the values it changes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// Provider selectors
// ---------------------------------------------------------------------------

/// Selects which language-model backend answers dialog turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Any OpenAI-compatible REST API (OpenAI, Groq, Ollama, LM Studio …).
    OpenAiCompatible,
    /// Offline echo model, no network access.
    Stub,
}

impl Default for LlmProvider {
    fn default() -> Self {
        Self::OpenAiCompatible
    }
}

/// Selects the speech-to-text backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProvider {
    /// OpenAI-compatible `/v1/audio/transcriptions` endpoint.
    WhisperApi,
    /// ElevenLabs `/v1/speech-to-text`.
    #[serde(alias = "elevenlabs")]
    ElevenLabs,
    /// Offline stub that reports how many frames it heard.
    Echo,
}

impl Default for SttProvider {
    fn default() -> Self {
        Self::WhisperApi
    }
}

/// Selects the text-to-speech backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsProvider {
    /// ElevenLabs streaming endpoint.
    ElevenLabs,
    /// OpenAI `/v1/audio/speech` (whole body, re-chunked locally).
    OpenAi,
    /// Offline stub that "speaks" the UTF-8 bytes of the text.
    Silent,
}

impl Default for TtsProvider {
    fn default() -> Self {
        Self::ElevenLabs
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture-side audio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Spoken wake word (informational; the energy detector does not decode words).
    pub wake_word: String,
    /// Capture sample rate in Hz.  Frames are 16-bit mono PCM at this rate.
    pub sample_rate: u32,
    /// Duration of one capture frame in milliseconds.
    pub chunk_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            wake_word: "claude".into(),
            sample_rate: 16_000,
            chunk_ms: 30,
        }
    }
}

impl AudioConfig {
    /// Number of bytes in one 16-bit mono frame.
    pub fn frame_bytes(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize / 1000) * 2
    }
}

// ---------------------------------------------------------------------------
// VadConfig / WakeConfig
// ---------------------------------------------------------------------------

/// Energy VAD thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy (16-bit sample units) at or above which a frame is speech.
    pub threshold: u32,
    /// Consecutive loud frames before speech is reported.
    pub speech_frames: u32,
    /// Consecutive quiet frames before the speech counter is cleared.
    pub silence_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 500,
            speech_frames: 3,
            silence_frames: 5,
        }
    }
}

/// Wake gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// When `false` the voice loop starts (and stays) in the listening state.
    pub enabled: bool,
    /// RMS energy a frame must reach to count towards waking.
    pub threshold: u32,
    /// Consecutive loud frames required to wake.
    pub consecutive: u32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1200,
            consecutive: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// IdleConfig
// ---------------------------------------------------------------------------

/// Inactivity prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Seconds of inactivity before the idle prompt is spoken.
    pub ask_after_secs: u64,
    /// Seconds of inactivity before the session suspends.
    pub suspend_after_secs: u64,
    pub idle_prompt: String,
    /// Spoken on suspension; empty means suspend silently.
    pub suspend_prompt: String,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            ask_after_secs: 120,
            suspend_after_secs: 600,
            idle_prompt: "Are you still there?".into(),
            suspend_prompt: "Going idle. Say the wake word to resume.".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ToolConfig
// ---------------------------------------------------------------------------

/// Tool execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Allow shell, ssh and serial tools.  Web fetches are always allowed.
    pub allow_risky: bool,
    /// Timeout applied when a call does not specify its own.
    pub default_timeout_secs: u64,
    /// stdout / stderr are truncated to this many characters.
    pub max_output_chars: usize,
    pub serial_baud_rate: u32,
    /// Seconds to wait for a serial device to answer before reading.
    pub serial_read_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            allow_risky: true,
            default_timeout_secs: 180,
            max_output_chars: 4000,
            serial_baud_rate: 115_200,
            serial_read_secs: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Buffered playback pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of synthesized audio in Hz.
    pub sample_rate: u32,
    /// Audio accumulated before the first chunk is played.
    pub min_buffer_ms: u64,
    /// Advisory ceiling on buffered audio; exceeding it is logged, not enforced.
    pub max_buffer_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            min_buffer_ms: 100,
            max_buffer_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Settings for the dialog language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL of the API endpoint (without `/v1/...`).
    ///
    /// - Ollama default: `http://localhost:11434`
    /// - OpenAI: `https://api.openai.com`
    pub base_url: String,
    /// API key, `None` for local providers.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    /// Maximum seconds to wait for a response.
    pub timeout_secs: u64,
    /// Request server-sent-event streaming.
    pub streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:3b".into(),
            max_tokens: 512,
            temperature: 0.3,
            timeout_secs: 120,
            streaming: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SttConfig / TtsConfig
// ---------------------------------------------------------------------------

/// Settings for the transcription provider.
///
/// `base_url` and `model` default to the Whisper API; the ElevenLabs
/// transcriber swaps in its own values while they are left at those
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// ISO-639-1 code, or `None` for automatic detection.
    pub language: Option<String>,
}

impl SttConfig {
    pub const WHISPER_BASE_URL: &'static str = "https://api.openai.com";
    pub const WHISPER_MODEL: &'static str = "whisper-1";
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::default(),
            base_url: Self::WHISPER_BASE_URL.into(),
            api_key: None,
            model: Self::WHISPER_MODEL.into(),
            language: None,
        }
    }
}

/// Settings for the speech synthesis provider.
///
/// `base_url`, `voice` and `model` fall back to per-provider defaults when
/// unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// ElevenLabs voice id or OpenAI voice name.
    pub voice: Option<String>,
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// SessionConfig / DialogConfig
// ---------------------------------------------------------------------------

/// Where turn records are appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub storage_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: AppPaths::new().sessions_file,
        }
    }
}

/// Dialog behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Let the model embed tool directives in its replies.
    pub smart_tools: bool,
    /// How often the voice loop drains background completions.
    pub background_poll_ms: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            smart_tools: true,
            background_poll_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_agent::config::AppConfig;
///
/// // Load (returns Default when file is missing), then apply VA_* overrides.
/// let mut config = AppConfig::load().unwrap();
/// config.apply_env_overrides();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub wake: WakeConfig,
    pub idle: IdleConfig,
    pub tools: ToolConfig,
    pub playback: PlaybackConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub sessions: SessionConfig,
    pub dialog: DialogConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `VA_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values produced by `lookup`.  Unparseable numbers are logged
    /// and ignored so a typo never prevents start-up.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        fn num<T: std::str::FromStr>(key: &str, raw: Option<String>, slot: &mut T) {
            if let Some(raw) = raw {
                match raw.trim().parse() {
                    Ok(v) => *slot = v,
                    Err(_) => log::warn!("config: ignoring {key}={raw:?} (not a number)"),
                }
            }
        }
        fn flag(raw: Option<String>, slot: &mut bool) {
            if let Some(raw) = raw {
                *slot = raw.trim().eq_ignore_ascii_case("true");
            }
        }

        if let Some(v) = get("VA_WAKE_WORD") {
            self.audio.wake_word = v;
        }
        num("VA_SAMPLE_RATE", get("VA_SAMPLE_RATE"), &mut self.audio.sample_rate);
        num("VA_CHUNK_MS", get("VA_CHUNK_MS"), &mut self.audio.chunk_ms);

        if let Some(v) = get("VA_STT_PROVIDER") {
            match v.as_str() {
                "whisper_api" => self.stt.provider = SttProvider::WhisperApi,
                "elevenlabs" | "eleven_labs" => self.stt.provider = SttProvider::ElevenLabs,
                "echo" => self.stt.provider = SttProvider::Echo,
                other => log::warn!("config: unknown VA_STT_PROVIDER {other:?}"),
            }
        }
        if let Some(v) = get("VA_STT_API_KEY") {
            self.stt.api_key = Some(v);
        }
        if let Some(v) = get("VA_STT_MODEL") {
            self.stt.model = v;
        }
        if let Some(v) = get("VA_STT_LANGUAGE") {
            self.stt.language = Some(v);
        }

        if let Some(v) = get("VA_TTS_PROVIDER") {
            match v.as_str() {
                "elevenlabs" => self.tts.provider = TtsProvider::ElevenLabs,
                "openai" => self.tts.provider = TtsProvider::OpenAi,
                "silent" => self.tts.provider = TtsProvider::Silent,
                other => log::warn!("config: unknown VA_TTS_PROVIDER {other:?}"),
            }
        }
        if let Some(v) = get("VA_TTS_API_KEY") {
            self.tts.api_key = Some(v);
        }
        if let Some(v) = get("VA_TTS_VOICE_ID") {
            self.tts.voice = Some(v);
        }

        if let Some(v) = get("VA_LLM_PROVIDER") {
            match v.as_str() {
                "openai_compatible" => self.llm.provider = LlmProvider::OpenAiCompatible,
                "stub" => self.llm.provider = LlmProvider::Stub,
                other => log::warn!("config: unknown VA_LLM_PROVIDER {other:?}"),
            }
        }
        if let Some(v) = get("VA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("VA_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("VA_LLM_MODEL") {
            self.llm.model = v;
        }
        num("VA_LLM_MAX_TOKENS", get("VA_LLM_MAX_TOKENS"), &mut self.llm.max_tokens);

        flag(get("VA_ALLOW_RISKY"), &mut self.tools.allow_risky);
        num(
            "VA_TOOL_TIMEOUT",
            get("VA_TOOL_TIMEOUT"),
            &mut self.tools.default_timeout_secs,
        );
        num(
            "VA_TOOL_MAX_OUTPUT",
            get("VA_TOOL_MAX_OUTPUT"),
            &mut self.tools.max_output_chars,
        );

        if let Some(v) = get("VA_SESSION_PATH") {
            self.sessions.storage_path = PathBuf::from(v);
        }

        num(
            "VA_IDLE_ASK_AFTER",
            get("VA_IDLE_ASK_AFTER"),
            &mut self.idle.ask_after_secs,
        );
        num(
            "VA_IDLE_SUSPEND_AFTER",
            get("VA_IDLE_SUSPEND_AFTER"),
            &mut self.idle.suspend_after_secs,
        );
        if let Some(v) = get("VA_IDLE_PROMPT") {
            self.idle.idle_prompt = v;
        }
        // An explicitly empty suspend prompt is meaningful, so bypass `get`.
        if let Some(v) = lookup("VA_IDLE_SUSPEND_PROMPT") {
            self.idle.suspend_prompt = v;
        }

        num("VA_VAD_THRESHOLD", get("VA_VAD_THRESHOLD"), &mut self.vad.threshold);
        num(
            "VA_VAD_SPEECH_FRAMES",
            get("VA_VAD_SPEECH_FRAMES"),
            &mut self.vad.speech_frames,
        );
        num(
            "VA_VAD_SILENCE_FRAMES",
            get("VA_VAD_SILENCE_FRAMES"),
            &mut self.vad.silence_frames,
        );

        flag(get("VA_WAKE_ENABLED"), &mut self.wake.enabled);
        num("VA_WAKE_THRESHOLD", get("VA_WAKE_THRESHOLD"), &mut self.wake.threshold);
        num(
            "VA_WAKE_CONSECUTIVE",
            get("VA_WAKE_CONSECUTIVE"),
            &mut self.wake.consecutive,
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
