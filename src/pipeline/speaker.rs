//! Speaking replies: synthesizer → buffered player.
//!
//! [`Speaker`] is the seam the voice loop and the idle manager talk to.
//! [`SpeechPlayer`] streams synthesized chunks into a
//! [`BufferedAudioPlayer`] from a background task so `play` returns as soon
//! as playback has started.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audio::BufferedAudioPlayer;
use crate::tts::SpeechSynthesizer;

const DONE_POLL: Duration = Duration::from_millis(10);

/// Something that can say text out loud and be interrupted.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Start speaking `text`, interrupting anything already playing.
    async fn play(&self, text: &str);

    /// Stop immediately.  Nothing reaches the sink after this returns.
    async fn stop(&self);

    /// Wait until the current reply has been fully played (or stopped).
    async fn wait_idle(&self) {}
}

/// [`Speaker`] backed by a [`SpeechSynthesizer`] and a [`BufferedAudioPlayer`].
pub struct SpeechPlayer {
    synth: Arc<dyn SpeechSynthesizer>,
    player: Arc<BufferedAudioPlayer>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechPlayer {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, player: Arc<BufferedAudioPlayer>) -> Self {
        Self {
            synth,
            player,
            stream_task: Mutex::new(None),
        }
    }

    pub fn player(&self) -> &Arc<BufferedAudioPlayer> {
        &self.player
    }

    async fn halt(&self, slot: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = slot.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.player.stop().await;
    }
}

#[async_trait]
impl Speaker for SpeechPlayer {
    async fn play(&self, text: &str) {
        let text = text.trim();
        let mut slot = self.stream_task.lock().await;
        self.halt(&mut slot).await;
        if text.is_empty() {
            return;
        }

        self.player.start_stream().await;
        let mut chunks = self.synth.stream_synthesize(text);
        let player = Arc::clone(&self.player);
        *slot = Some(tokio::spawn(async move {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        if !chunk.audio.is_empty() {
                            player.add_chunk(chunk.audio);
                        }
                        if chunk.is_final {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("speaker: synthesis failed: {e}");
                        break;
                    }
                }
            }
            player.finish_stream().await;
        }));
        log::debug!("speaker: playing {} chars", text.chars().count());
    }

    async fn stop(&self) {
        let mut slot = self.stream_task.lock().await;
        self.halt(&mut slot).await;
    }

    async fn wait_idle(&self) {
        loop {
            let done = self
                .stream_task
                .lock()
                .await
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            if done {
                return;
            }
            tokio::time::sleep(DONE_POLL).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSink, SinkError};
    use crate::config::PlaybackConfig;
    use crate::tts::SilentSynthesizer;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        written: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn write(&self, chunk: &[u8]) -> Result<(), SinkError> {
            self.written.lock().unwrap().push(chunk.to_vec());
            Ok(())
        }
    }

    fn speech_player(sink: Arc<RecordingSink>) -> SpeechPlayer {
        let player = Arc::new(BufferedAudioPlayer::new(sink, &PlaybackConfig::default()));
        SpeechPlayer::new(Arc::new(SilentSynthesizer), player)
    }

    #[tokio::test(start_paused = true)]
    async fn play_delivers_synthesized_audio() {
        let sink = Arc::new(RecordingSink::default());
        let speaker = speech_player(Arc::clone(&sink));

        speaker.play("hello").await;
        speaker.wait_idle().await;

        assert_eq!(*sink.written.lock().unwrap(), vec![b"hello".to_vec()]);
        assert!(!speaker.player().is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_buffer_fills_plays_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let speaker = speech_player(Arc::clone(&sink));

        speaker.play("hello").await;
        speaker.stop().await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_play_interrupts_previous() {
        let sink = Arc::new(RecordingSink::default());
        let speaker = speech_player(Arc::clone(&sink));

        speaker.play("first").await;
        speaker.play("second").await;
        speaker.wait_idle().await;

        assert_eq!(*sink.written.lock().unwrap(), vec![b"second".to_vec()]);
    }

    #[tokio::test]
    async fn blank_text_is_not_spoken() {
        let sink = Arc::new(RecordingSink::default());
        let speaker = speech_player(Arc::clone(&sink));
        speaker.play("   ").await;
        speaker.wait_idle().await;
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[test]
    fn speaker_is_object_safe() {
        fn assert_dyn(_: &dyn Speaker) {}
        let sink = Arc::new(RecordingSink::default());
        assert_dyn(&speech_player(sink));
    }
}
