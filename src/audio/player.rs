//! Buffered, paced playback with immediate cancellation (barge-in).
//!
//! ```text
//! add_chunk ──▶ VecDeque (one mutex) ──▶ pacing task ──▶ AudioSink
//!                                          │
//!             stop() ── abort + await ─────┘
//! ```
//!
//! The pacing task first waits until `min_buffer_ms` of wall time has passed
//! (or more than five chunks are queued), then hands chunks to the sink one
//! at a time.  Sink errors are logged and swallowed.  Once
//! [`BufferedAudioPlayer::stop`] returns, no further chunk reaches the sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PlaybackConfig;

use super::sink::AudioSink;

/// Chunks queued beyond this count start playback before the buffer time.
const EAGER_START_CHUNKS: usize = 5;
const EMPTY_POLL: Duration = Duration::from_millis(10);
const CHUNK_GAP: Duration = Duration::from_millis(1);

struct Shared {
    sink: Arc<dyn AudioSink>,
    queue: Mutex<VecDeque<Vec<u8>>>,
    playing: AtomicBool,
    cancelled: AtomicBool,
    /// A chunk has been popped but the sink write has not returned yet.
    in_flight: AtomicBool,
    sample_rate: u32,
    min_buffer: Duration,
    max_buffer_ms: u64,
}

impl Shared {
    fn active(&self) -> bool {
        self.playing.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Milliseconds of 16-bit mono audio currently queued.
    fn queued_ms(queue: &VecDeque<Vec<u8>>, sample_rate: u32) -> u64 {
        let bytes: usize = queue.iter().map(Vec::len).sum();
        if sample_rate == 0 {
            return 0;
        }
        (bytes as u64 / 2) * 1000 / sample_rate as u64
    }
}

// ---------------------------------------------------------------------------
// BufferedAudioPlayer
// ---------------------------------------------------------------------------

/// Paced playback queue in front of an [`AudioSink`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_agent::audio::{BufferedAudioPlayer, NullSink};
/// use voice_agent::config::PlaybackConfig;
///
/// # async fn demo() {
/// let player = BufferedAudioPlayer::new(Arc::new(NullSink), &PlaybackConfig::default());
/// player.start_stream().await;
/// player.add_chunk(vec![0; 4800]);
/// player.finish_stream().await; // returns once drained
/// # }
/// ```
pub struct BufferedAudioPlayer {
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BufferedAudioPlayer {
    pub fn new(sink: Arc<dyn AudioSink>, config: &PlaybackConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                queue: Mutex::new(VecDeque::new()),
                playing: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                sample_rate: config.sample_rate,
                min_buffer: Duration::from_millis(config.min_buffer_ms),
                max_buffer_ms: config.max_buffer_ms,
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Stop any current stream, clear the queue and start a fresh pacing task.
    pub async fn start_stream(&self) {
        let mut slot = self.task.lock().await;
        Self::halt(&self.shared, &mut slot).await;

        self.shared.queue().clear();
        self.shared.cancelled.store(false, Ordering::SeqCst);
        self.shared.playing.store(true, Ordering::SeqCst);
        *slot = Some(tokio::spawn(pacing_loop(Arc::clone(&self.shared))));
        log::debug!("player: stream started");
    }

    /// Queue a chunk.  Dropped unless a stream is active.
    pub fn add_chunk(&self, chunk: Vec<u8>) {
        if !self.shared.active() {
            return;
        }
        let mut queue = self.shared.queue();
        // Re-check under the lock so a concurrent stop() cannot be raced.
        if !self.shared.active() {
            return;
        }
        queue.push_back(chunk);
        let queued = Shared::queued_ms(&queue, self.shared.sample_rate);
        if queued > self.shared.max_buffer_ms {
            log::debug!(
                "player: {queued} ms buffered (above {} ms)",
                self.shared.max_buffer_ms
            );
        }
    }

    /// No more chunks are coming: wait for the queue to drain, then stop.
    ///
    /// Returns early if the stream is cancelled meanwhile.
    pub async fn finish_stream(&self) {
        loop {
            if !self.shared.active() {
                break;
            }
            let drained = self.shared.queue().is_empty()
                && !self.shared.in_flight.load(Ordering::SeqCst);
            if drained {
                break;
            }
            tokio::time::sleep(EMPTY_POLL).await;
        }
        self.stop().await;
    }

    /// Cancel immediately: clear the queue and await the pacing task.
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        Self::halt(&self.shared, &mut slot).await;
    }

    async fn halt(shared: &Shared, slot: &mut Option<JoinHandle<()>>) {
        shared.cancelled.store(true, Ordering::SeqCst);
        {
            let mut queue = shared.queue();
            shared.playing.store(false, Ordering::SeqCst);
            queue.clear();
        }
        if let Some(handle) = slot.take() {
            handle.abort();
            // A cancelled JoinError is the expected outcome here.
            let _ = handle.await;
            log::debug!("player: stopped");
        }
        shared.in_flight.store(false, Ordering::SeqCst);
    }

    /// `true` while a stream is active and its pacing task is alive.
    pub fn is_playing(&self) -> bool {
        if !self.shared.active() {
            return false;
        }
        match self.task.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|h| !h.is_finished()),
            // start/stop in progress
            Err(_) => false,
        }
    }

    /// Number of chunks waiting to be played.
    pub fn queued_chunks(&self) -> usize {
        self.shared.queue().len()
    }
}

async fn pacing_loop(shared: Arc<Shared>) {
    let started = Instant::now();
    while shared.active() {
        let eager = shared.queue().len() > EAGER_START_CHUNKS;
        if eager || started.elapsed() >= shared.min_buffer {
            break;
        }
        tokio::time::sleep(EMPTY_POLL).await;
    }

    while shared.active() {
        let next = {
            let mut queue = shared.queue();
            let chunk = queue.pop_front();
            if chunk.is_some() {
                shared.in_flight.store(true, Ordering::SeqCst);
            }
            chunk
        };
        let Some(chunk) = next else {
            tokio::time::sleep(EMPTY_POLL).await;
            continue;
        };

        if !chunk.is_empty() {
            if let Err(e) = shared.sink.write(&chunk).await {
                log::warn!("player: sink write failed: {e}");
            }
        }
        shared.in_flight.store(false, Ordering::SeqCst);
        tokio::time::sleep(CHUNK_GAP).await;
    }
    shared.playing.store(false, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::SinkError;
    use async_trait::async_trait;

    /// Records every chunk it receives.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn taken(&self) -> Vec<Vec<u8>> {
            self.chunks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn write(&self, chunk: &[u8]) -> Result<(), SinkError> {
            self.chunks.lock().unwrap().push(chunk.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AudioSink for FailingSink {
        async fn write(&self, _chunk: &[u8]) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    fn player(sink: Arc<dyn AudioSink>) -> BufferedAudioPlayer {
        BufferedAudioPlayer::new(sink, &PlaybackConfig::default())
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn finish_stream_delivers_everything_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        for i in 0..3u8 {
            p.add_chunk(vec![i; 4]);
        }
        p.finish_stream().await;

        assert_eq!(sink.taken(), vec![vec![0; 4], vec![1; 4], vec![2; 4]]);
        assert!(!p.is_playing());
        assert_eq!(p.queued_chunks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_plays_before_min_buffer() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        p.add_chunk(vec![1; 4]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.taken().is_empty());
        assert!(p.is_playing());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.taken().len(), 1);
        p.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn many_chunks_start_playback_early() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        for i in 0..6u8 {
            p.add_chunk(vec![i]);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sink.taken().is_empty());
        p.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_chunks_are_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        p.add_chunk(Vec::new());
        p.add_chunk(vec![7]);
        p.finish_stream().await;

        assert_eq!(sink.taken(), vec![vec![7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_errors_are_swallowed() {
        let p = player(Arc::new(FailingSink));
        p.start_stream().await;
        p.add_chunk(vec![1]);
        p.add_chunk(vec![2]);
        p.finish_stream().await;
        assert_eq!(p.queued_chunks(), 0);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn chunks_after_stop_never_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        p.add_chunk(vec![1]);
        p.stop().await;
        p.add_chunk(vec![2]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.taken().is_empty());
        assert_eq!(p.queued_chunks(), 0);
        assert!(!p.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let p = player(Arc::new(RecordingSink::default()));
        p.stop().await;
        p.start_stream().await;
        p.stop().await;
        p.stop().await;
        assert!(!p.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_stream_returns_when_cancelled() {
        let sink = Arc::new(RecordingSink::default());
        let p = Arc::new(player(sink.clone()));

        p.start_stream().await;
        p.add_chunk(vec![1]);
        let finisher = {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.finish_stream().await })
        };
        tokio::task::yield_now().await;
        p.stop().await;
        finisher.await.unwrap();
        assert!(!p.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_previous_stream() {
        let sink = Arc::new(RecordingSink::default());
        let p = player(sink.clone());

        p.start_stream().await;
        p.add_chunk(vec![1]);
        p.start_stream().await;
        p.add_chunk(vec![2]);
        p.finish_stream().await;

        assert_eq!(sink.taken(), vec![vec![2]]);
    }
}
