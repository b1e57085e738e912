//! Playback sinks: where paced audio chunks end up.
//!
//! The [`AudioSink`] trait is the only thing the
//! [`BufferedAudioPlayer`](super::BufferedAudioPlayer) knows about output.
//! Implementations here cover the non-device cases; the cpal speaker sink
//! lives in [`super::device`] behind the `device` feature.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

/// Errors raised by a sink while writing audio.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// AudioSink trait
// ---------------------------------------------------------------------------

/// Destination for paced audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn write(&self, chunk: &[u8]) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// NullSink
// ---------------------------------------------------------------------------

/// Discards everything.  Used when no output is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn write(&self, _chunk: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Appends raw audio bytes to a file (or any `Write`).
pub struct FileSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl FileSink {
    /// Create (truncate) `path` and write every chunk to it.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::from_writer(Box::new(std::io::BufWriter::new(file))))
    }

    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn write(&self, chunk: &[u8]) -> Result<(), SinkError> {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        out.write_all(chunk)?;
        out.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_sink_appends_chunks() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("out.raw");
        let sink = FileSink::create(&path).expect("create");

        sink.write(&[1, 2]).await.unwrap();
        sink.write(&[3]).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn null_sink_accepts_anything() {
        assert!(NullSink.write(&[0; 16]).await.is_ok());
    }

    #[test]
    fn sink_is_object_safe() {
        let sink: Box<dyn AudioSink> = Box::new(NullSink);
        drop(sink);
    }
}
