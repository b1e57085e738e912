//! Microphone capture and speaker output via `cpal` (feature `device`).
//!
//! [`MicCapture`] opens the default input device as 16-bit-compatible mono
//! at the configured sample rate and forwards fixed-size frames to an
//! [`AudioFrontend`] from the cpal callback thread.  The returned
//! [`StreamHandle`] is a RAII guard: dropping it stops the hardware stream.
//!
//! [`SpeakerSink`] implements [`AudioSink`] on the default output device.
//! The cpal output stream lives on its own thread because `cpal::Stream` is
//! not `Send` on every platform.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::frame::AudioFrontend;
use super::sink::{AudioSink, SinkError};

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening an audio device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no input device found on the default audio host")]
    NoInput,

    #[error("no output device found on the default audio host")]
    NoOutput,

    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio output thread exited before the stream started")]
    OutputThread,
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

// ---------------------------------------------------------------------------
// MicCapture
// ---------------------------------------------------------------------------

/// RAII guard that keeps the input stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

/// Default-microphone capture producing `chunk_ms` frames.
pub struct MicCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    frame_samples: usize,
}

impl MicCapture {
    /// Open the default input device as mono at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoInput`] when no input device is available.
    /// Devices that reject the requested format fail later, in
    /// [`start`](Self::start).
    pub fn new(sample_rate: u32, chunk_ms: u32) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(DeviceError::NoInput)?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let frame_samples = (sample_rate as usize * chunk_ms as usize / 1000).max(1);
        Ok(Self {
            device,
            config,
            frame_samples,
        })
    }

    /// Start capturing into `frontend`.
    ///
    /// The callback accumulates samples and enqueues one frame every
    /// `chunk_ms`; enqueue is synchronous and never blocks the audio thread.
    pub fn start(&self, frontend: Arc<AudioFrontend>) -> Result<StreamHandle, DeviceError> {
        let frame_samples = self.frame_samples;
        let mut pending: Vec<u8> = Vec::with_capacity(frame_samples * 2);

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &s in data {
                    pending.extend_from_slice(&f32_to_i16(s).to_le_bytes());
                    if pending.len() >= frame_samples * 2 {
                        let frame = std::mem::replace(
                            &mut pending,
                            Vec::with_capacity(frame_samples * 2),
                        );
                        frontend.enqueue_frame(Some(frame));
                    }
                }
            },
            |err: cpal::StreamError| {
                log::error!("device: input stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!("device: microphone capture started");
        Ok(StreamHandle { _stream: stream })
    }
}

// ---------------------------------------------------------------------------
// SpeakerSink
// ---------------------------------------------------------------------------

/// Plays 16-bit LE mono PCM on the default output device.
pub struct SpeakerSink {
    samples: Arc<Mutex<VecDeque<i16>>>,
    shutdown: Arc<AtomicBool>,
}

impl SpeakerSink {
    /// Open the default output device at `sample_rate` on a dedicated thread.
    pub fn open(sample_rate: u32) -> Result<Self, DeviceError> {
        let samples: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();

        {
            let samples = Arc::clone(&samples);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                let stream = match build_output(sample_rate, samples) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while !shutdown.load(Ordering::SeqCst) {
                    std::thread::park_timeout(std::time::Duration::from_millis(200));
                }
                drop(stream);
            });
        }

        ready_rx.recv().map_err(|_| DeviceError::OutputThread)??;
        log::info!("device: speaker output started at {sample_rate} Hz");
        Ok(Self { samples, shutdown })
    }
}

fn build_output(
    sample_rate: u32,
    samples: Arc<Mutex<VecDeque<i16>>>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoOutput)?;
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let stream = device.build_output_stream(
        &config,
        move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queue = samples.lock().unwrap_or_else(PoisonError::into_inner);
            for slot in out.iter_mut() {
                *slot = queue
                    .pop_front()
                    .map(|s| s as f32 / i16::MAX as f32)
                    .unwrap_or(0.0);
            }
        },
        |err: cpal::StreamError| {
            log::error!("device: output stream error: {err}");
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn write(&self, chunk: &[u8]) -> Result<(), SinkError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let mut queue = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        queue.extend(
            chunk
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        Ok(())
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
