//! Audio frames and stream format

use std::sync::Arc;
use std::time::Duration;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Default frame length in milliseconds (1600 samples at 16kHz)
pub const DEFAULT_FRAME_MS: u32 = 100;

/// Format every frame of a stream shares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Frame length in milliseconds
    pub frame_ms: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

impl AudioFormat {
    /// Number of mono samples in one frame
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Wall duration of one frame
    #[must_use]
    pub const fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Number of frames that cover `span`, rounded up
    #[must_use]
    pub fn frames_in(&self, span: Duration) -> usize {
        let frame_ms = u128::from(self.frame_ms.max(1));
        usize::try_from(span.as_millis().div_ceil(frame_ms)).unwrap_or(usize::MAX)
    }
}

/// A fixed-length block of mono samples
///
/// Cloning is cheap: the samples are shared and never mutated after the
/// frame is produced.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    timestamp: Duration,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioFrame {
    /// Create a frame starting `timestamp` after the stream opened
    #[must_use]
    pub fn new(timestamp: Duration, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            timestamp,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Offset of the first sample from the start of the stream
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Offset just past the last sample
    #[must_use]
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }

    /// Sample rate of this frame
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The samples, f32 in [-1.0, 1.0]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Audio duration covered by this frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.samples.len() as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }

    /// RMS energy of the frame
    #[must_use]
    pub fn energy(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Splits a continuous sample stream into fixed-length frames
///
/// Timestamps are derived from the number of samples emitted, so they stay
/// exact regardless of callback jitter.
#[derive(Debug)]
pub struct FrameAssembler {
    format: AudioFormat,
    pending: Vec<f32>,
    emitted: u64,
}

impl FrameAssembler {
    /// Create an assembler for `format`
    #[must_use]
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            pending: Vec::with_capacity(format.frame_len()),
            emitted: 0,
        }
    }

    /// Append samples, handing every completed frame to `emit`
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        let frame_len = self.format.frame_len().max(1);
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() == frame_len {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(frame_len));
                emit(AudioFrame::new(self.position(), self.format.sample_rate, samples));
                self.emitted += frame_len as u64;
            }
        }
    }

    /// Stream offset of the next frame
    #[must_use]
    pub fn position(&self) -> Duration {
        let rate = u64::from(self.format.sample_rate.max(1));
        Duration::from_micros(self.emitted * 1_000_000 / rate)
    }
}

/// Downmix interleaved multi-channel audio to mono by averaging channels
#[must_use]
pub fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / ch as f32;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
