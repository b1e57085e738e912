//! Audio frames and the frame queue fed by the capture side.
//!
//! [`AudioFrontend`] is an unbounded FIFO of [`AudioFrame`]s.  The producer
//! side ([`AudioFrontend::enqueue_frame`]) is synchronous so the cpal
//! callback thread can call it directly; the consumer side is an async
//! stream that ends at the end-of-utterance sentinel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One capture frame of 16-bit little-endian mono PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonic capture time.
    pub timestamp: Instant,
    pub data: Vec<u8>,
}

impl AudioFrame {
    /// Stamp `data` with the current monotonic time.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            timestamp: Instant::now(),
            data,
        }
    }

    /// Root-mean-square energy of the frame in 16-bit sample units.
    ///
    /// A trailing odd byte is ignored.  An empty frame has zero energy.
    pub fn rms(&self) -> f64 {
        rms_s16le(&self.data)
    }
}

/// RMS of 16-bit LE samples.
pub fn rms_s16le(data: &[u8]) -> f64 {
    let samples = data.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let sum_sq: f64 = data
        .chunks_exact(2)
        .map(|b| {
            let s = i16::from_le_bytes([b[0], b[1]]) as f64;
            s * s
        })
        .sum();
    (sum_sq / samples as f64).sqrt()
}

/// An ordered run of frames captured while the VAD reported speech.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    pub frames: Vec<AudioFrame>,
}

impl Utterance {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Concatenated PCM of every frame.
    pub fn pcm(&self) -> Vec<u8> {
        self.frames.iter().flat_map(|f| f.data.iter().copied()).collect()
    }
}

// ---------------------------------------------------------------------------
// AudioFrontend
// ---------------------------------------------------------------------------

/// Unbounded, ordered frame queue with a start / stop lifecycle.
///
/// `None` on the queue is the end-of-utterance sentinel: the stream returned
/// by [`frames`](Self::frames) ends when it sees one.
pub struct AudioFrontend {
    tx: mpsc::UnboundedSender<Option<AudioFrame>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Option<AudioFrame>>>>,
    running: AtomicBool,
    stopped: Notify,
}

impl AudioFrontend {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            running: AtomicBool::new(false),
            stopped: Notify::new(),
        }
    }

    /// Begin accepting frames.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        log::debug!("frontend: started");
    }

    /// Stop accepting frames, push the sentinel and wake any
    /// [`wait_stopped`](Self::wait_stopped) callers.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(None);
            log::debug!("frontend: stopped");
        }
        self.stopped.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue one frame (`Some`) or the sentinel (`None`).
    ///
    /// Ignored while stopped.  Safe to call from any thread.
    pub fn enqueue_frame(&self, data: Option<Vec<u8>>) {
        if !self.is_running() {
            return;
        }
        let _ = self.tx.send(data.map(AudioFrame::new));
    }

    /// Push the end-of-utterance sentinel.
    pub fn end_utterance(&self) {
        self.enqueue_frame(None);
    }

    /// Stream of frames up to (not including) the next sentinel.
    ///
    /// Only one consumer reads at a time; a second call waits for the first
    /// stream to be dropped.
    pub fn frames(&self) -> BoxStream<'static, AudioFrame> {
        let rx = Arc::clone(&self.rx);
        futures::stream::unfold(rx, |rx| async move {
            let next = rx.lock().await.recv().await;
            match next {
                Some(Some(frame)) => Some((frame, rx)),
                Some(None) | None => None,
            }
        })
        .boxed()
    }

    /// Resolve once [`stop`](Self::stop) has been called.
    pub async fn wait_stopped(&self) {
        let notified = self.stopped.notified();
        if !self.is_running() {
            return;
        }
        notified.await;
    }
}

impl Default for AudioFrontend {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
