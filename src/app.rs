//! Application assembly: providers and subsystems built from [`AppConfig`].
//!
//! [`VoiceAgentApp`] owns everything a front end needs:
//!
//! ```text
//! AppConfig ──▶ build_llm / build_transcriber / build_synthesizer
//!           ──▶ ToolRunner ─┬─▶ SubAgentOrchestrator
//!                           └─▶ DialogManager ◀── JsonlSessionStore
//!
//! voice_loop(sink) ──▶ BufferedAudioPlayer ─▶ SpeechPlayer
//!                      UtteranceSegmenter (vad + optional wake)
//!                      IdleManager (suspend → segmenter)
//! ```
//!
//! Providers that need credentials degrade to their offline stubs when no
//! API key is configured, so the app always starts.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::SubAgentOrchestrator;
use crate::audio::{AudioSink, BufferedAudioPlayer, EnergyWakeDetector, VadDetector, WakeDetector};
use crate::config::{
    AppConfig, LlmConfig, LlmProvider, SttConfig, SttProvider, TtsConfig, TtsProvider,
};
use crate::dialog::{DialogManager, DialogTurn, JsonlSessionStore};
use crate::llm::{ApiClient, EchoLlm, LlmClient};
use crate::pipeline::{IdleManager, SpeechPlayer, Speaker, SuspendHook, UtteranceSegmenter, VoiceLoop};
use crate::stt::{EchoTranscriber, ElevenLabsTranscriber, Transcriber, WhisperApiTranscriber};
use crate::tools::ToolRunner;
use crate::tts::{ElevenLabsSynthesizer, OpenAiSynthesizer, SilentSynthesizer, SpeechSynthesizer};

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Build the dialog language model.
pub fn build_llm(config: &LlmConfig) -> Arc<dyn LlmClient> {
    match config.provider {
        LlmProvider::OpenAiCompatible => {
            log::info!("app: llm {} at {}", config.model, config.base_url);
            Arc::new(ApiClient::from_config(config))
        }
        LlmProvider::Stub => {
            log::info!("app: llm stub (echo)");
            Arc::new(EchoLlm::new(config.max_tokens as usize))
        }
    }
}

/// Build the transcriber for `sample_rate` Hz capture.
pub fn build_transcriber(config: &SttConfig, sample_rate: u32) -> Arc<dyn Transcriber> {
    let key = config.api_key.as_deref().filter(|k| !k.trim().is_empty());
    match (config.provider, key) {
        (SttProvider::WhisperApi, Some(_)) => {
            log::info!("app: stt {} at {}", config.model, config.base_url);
            Arc::new(WhisperApiTranscriber::new(config, sample_rate))
        }
        (SttProvider::ElevenLabs, Some(key)) => {
            let stt = ElevenLabsTranscriber::new(config, key, sample_rate);
            log::info!("app: stt elevenlabs {} at {}", stt.model(), stt.endpoint());
            Arc::new(stt)
        }
        (SttProvider::Echo, _) => Arc::new(EchoTranscriber),
        (provider, None) => {
            log::warn!("app: stt api_key not set for {provider:?}; using the echo transcriber");
            Arc::new(EchoTranscriber)
        }
    }
}

/// Build the synthesizer producing PCM at `sample_rate` Hz.
pub fn build_synthesizer(config: &TtsConfig, sample_rate: u32) -> Arc<dyn SpeechSynthesizer> {
    let key = config.api_key.as_deref().filter(|k| !k.trim().is_empty());
    match (config.provider, key) {
        (TtsProvider::ElevenLabs, Some(key)) => {
            log::info!("app: tts elevenlabs");
            Arc::new(ElevenLabsSynthesizer::new(config, key, sample_rate))
        }
        (TtsProvider::OpenAi, Some(key)) => {
            log::info!("app: tts openai");
            Arc::new(OpenAiSynthesizer::new(config, key))
        }
        (TtsProvider::Silent, _) => Arc::new(SilentSynthesizer),
        (provider, None) => {
            log::warn!("app: tts api_key not set for {provider:?}; using the silent synthesizer");
            Arc::new(SilentSynthesizer)
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceAgentApp
// ---------------------------------------------------------------------------

/// Fully wired agent: text turns directly, voice turns through
/// [`voice_loop`](Self::voice_loop).
pub struct VoiceAgentApp {
    config: AppConfig,
    tools: Arc<ToolRunner>,
    agents: Arc<SubAgentOrchestrator>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    dialog: Arc<DialogManager>,
}

impl VoiceAgentApp {
    pub fn new(config: AppConfig) -> Self {
        let llm = build_llm(&config.llm);
        let transcriber = build_transcriber(&config.stt, config.audio.sample_rate);
        let synthesizer = build_synthesizer(&config.tts, config.playback.sample_rate);

        let tools = Arc::new(ToolRunner::new(config.tools.clone()));
        let agents = Arc::new(SubAgentOrchestrator::new(
            Arc::clone(&llm),
            Arc::clone(&tools),
        ));
        let sessions = Arc::new(JsonlSessionStore::new(config.sessions.storage_path.clone()));
        let dialog = Arc::new(DialogManager::new(
            llm,
            Arc::clone(&tools),
            Some(Arc::clone(&agents)),
            sessions,
            config.dialog.smart_tools,
        ));
        log::info!(
            "app: session {} logging to {}",
            dialog.session_id(),
            config.sessions.storage_path.display()
        );

        Self {
            config,
            tools,
            agents,
            transcriber,
            synthesizer,
            dialog,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dialog(&self) -> &Arc<DialogManager> {
        &self.dialog
    }

    pub fn tools(&self) -> &Arc<ToolRunner> {
        &self.tools
    }

    pub fn agents(&self) -> &Arc<SubAgentOrchestrator> {
        &self.agents
    }

    /// Run one typed turn.
    pub async fn handle_text(&self, text: &str) -> DialogTurn {
        self.dialog.handle_user_text(text).await
    }

    /// Drain finished background work into turns.
    pub async fn poll_background(&self) -> Vec<DialogTurn> {
        self.dialog.poll_background().await
    }

    /// Build a voice loop that plays replies into `sink`.
    ///
    /// The wake gate is installed only when `wake.enabled`; the idle
    /// manager's suspend hook sends the segmenter back to dormant.
    pub fn voice_loop(&self, sink: Arc<dyn AudioSink>) -> VoiceLoop {
        let player = Arc::new(BufferedAudioPlayer::new(sink, &self.config.playback));
        let speaker: Arc<dyn Speaker> = Arc::new(SpeechPlayer::new(
            Arc::clone(&self.synthesizer),
            player,
        ));

        let wake: Option<Box<dyn WakeDetector>> = if self.config.wake.enabled {
            Some(Box::new(EnergyWakeDetector::from_config(&self.config.wake)))
        } else {
            None
        };
        let segmenter = UtteranceSegmenter::new(VadDetector::from_config(&self.config.vad), wake);

        let suspend = segmenter.suspend_handle();
        let hook: SuspendHook = Arc::new(move || suspend.store(true, Ordering::SeqCst));
        let idle = Arc::new(IdleManager::new(
            &self.config.idle,
            Arc::clone(&speaker),
            Some(hook),
        ));

        VoiceLoop::new(
            Arc::clone(&self.transcriber),
            Arc::clone(&self.dialog),
            speaker,
            segmenter,
            Duration::from_millis(self.config.dialog.background_poll_ms),
        )
        .with_idle(idle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
