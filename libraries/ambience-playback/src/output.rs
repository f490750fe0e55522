//! Audio outputs
//!
//! The render loop hands every mixed block to an [`AudioOutput`]. Device
//! backends live outside the engine; the daemon streams raw PCM to stdout.

use crate::error::Result;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Sink for mixed interleaved stereo blocks
pub trait AudioOutput: Send {
    /// Write one block of samples in [-1.0, 1.0]
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Flush anything buffered
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn write(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }
}

/// Keeps every rendered sample in memory
///
/// Clones share the same buffer, so a test can keep one handle and give
/// the other to the engine.
#[derive(Debug, Default, Clone)]
pub struct CaptureOutput {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far
    pub fn samples(&self) -> Vec<f32> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of captured samples
    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest absolute sample in the last `count` samples
    pub fn recent_peak(&self, count: usize) -> f32 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let start = samples.len().saturating_sub(count);
        samples[start..].iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AudioOutput for CaptureOutput {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(samples);
        Ok(())
    }
}

/// Interleaved signed 16-bit little-endian PCM to any writer
pub struct WriterOutput<W: Write + Send> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write + Send> WriterOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AudioOutput for WriterOutput<W> {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.buffer.clear();
        self.buffer.reserve(samples.len() * 2);
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
        self.writer.write_all(&self.buffer)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
