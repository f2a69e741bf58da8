//! Audio sources feeding the session
//!
//! An [`AudioSource`] delivers fixed-length frames to exactly one reader.
//! Frames produced faster than they are read wait in a bounded
//! [`FrameQueue`]; when it is full the oldest frame is dropped.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::frame::{AudioFormat, AudioFrame, FrameAssembler, downmix_to_mono};
use super::resample::resample;
use crate::{Error, Result};

/// A continuous stream of audio frames
#[async_trait]
pub trait AudioSource: Send {
    /// Human-readable source name for logs
    fn name(&self) -> &str;

    /// Acquire the device and start producing frames
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device cannot be opened
    async fn open(&mut self, format: AudioFormat) -> Result<()>;

    /// Wait for the next frame
    ///
    /// Cancel safe: dropping the future never loses a frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` on disconnect and `Error::SourceExhausted`
    /// when a finite source has no more frames
    async fn read_frame(&mut self) -> Result<AudioFrame>;

    /// Drop queued frames, returning how many were discarded
    fn discard_pending(&mut self) -> usize;

    /// Release the device
    fn close(&mut self);
}

#[derive(Debug)]
enum Closed {
    Finished,
    Failed(String),
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    dropped: u64,
    closed: Option<Closed>,
}

/// Bounded frame queue between a producer thread and the async reader
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a frame, dropping the oldest one when full
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut state = self.lock();
            if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                if state.dropped.is_power_of_two() {
                    tracing::warn!(dropped = state.dropped, "audio queue full, dropping oldest frames");
                }
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Mark the producer as failed; readers get `Error::Device` once drained
    pub fn fail(&self, reason: impl Into<String>) {
        self.lock().closed = Some(Closed::Failed(reason.into()));
        self.notify.notify_one();
    }

    /// Mark the producer as finished; readers get `Error::SourceExhausted`
    pub fn finish(&self) {
        self.lock().closed = Some(Closed::Finished);
        self.notify.notify_one();
    }

    /// Wait for the next frame
    ///
    /// # Errors
    ///
    /// Returns the producer's terminal error once the queue is drained
    pub async fn pop(&self) -> Result<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Ok(frame);
                }
                match &state.closed {
                    Some(Closed::Failed(reason)) => return Err(Error::Device(reason.clone())),
                    Some(Closed::Finished) => return Err(Error::SourceExhausted),
                    None => {}
                }
            }
            notified.await;
        }
    }

    /// Drop all queued frames, returning the count
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.frames.len();
        state.frames.clear();
        n
    }

    /// Drop queued frames and any terminal state so the queue can be reused
    pub fn reset(&self) {
        let mut state = self.lock();
        state.frames.clear();
        state.closed = None;
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames dropped because the reader fell behind
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

/// Whether a scripted source waits for each frame's stream time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Deliver frames as fast as they are read
    #[default]
    Unpaced,
    /// Deliver each frame when its timestamp is reached
    RealTime,
}

/// Finite, in-memory audio source
///
/// Used by `replay` and by tests. Frames are delivered in order; afterwards
/// the source either reports exhaustion or produces silence forever.
pub struct ScriptedSource {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    frames: VecDeque<AudioFrame>,
    pacing: Pacing,
    then_silence: bool,
    failures: VecDeque<usize>,
    delivered: usize,
    next_timestamp: Duration,
    started: Option<Instant>,
    opens: usize,
    format: AudioFormat,
}

impl ScriptedSource {
    /// Create a source from mono samples at `sample_rate`
    #[must_use]
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            name: "scripted".to_string(),
            samples,
            sample_rate,
            frames: VecDeque::new(),
            pacing: Pacing::Unpaced,
            then_silence: false,
            failures: VecDeque::new(),
            delivered: 0,
            next_timestamp: Duration::ZERO,
            started: None,
            opens: 0,
            format: AudioFormat::default(),
        }
    }

    /// Create a source from a WAV file (any channel count, int or float)
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    #[allow(clippy::cast_precision_loss)]
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let mono = downmix_to_mono(&interleaved, spec.channels);
        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            samples = mono.len(),
            "loaded wav"
        );

        let mut source = Self::from_samples(mono, spec.sample_rate);
        source.name = path.display().to_string();
        Ok(source)
    }

    /// Deliver frames at their stream time instead of immediately
    #[must_use]
    pub const fn paced(mut self) -> Self {
        self.pacing = Pacing::RealTime;
        self
    }

    /// Produce silent frames forever once the script runs out
    #[must_use]
    pub const fn then_silence(mut self) -> Self {
        self.then_silence = true;
        self
    }

    /// Simulate a disconnect when frame number `index` is about to be read
    ///
    /// The source must be reopened afterwards; delivery then continues.
    #[must_use]
    pub fn fail_at(mut self, index: usize) -> Self {
        self.failures.push_back(index);
        self
    }

    /// How many times the source has been opened
    #[must_use]
    pub const fn open_count(&self) -> usize {
        self.opens
    }

    fn silence_frame(&self) -> AudioFrame {
        AudioFrame::new(
            self.next_timestamp,
            self.format.sample_rate,
            vec![0.0; self.format.frame_len()],
        )
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, format: AudioFormat) -> Result<()> {
        // Reopening after a simulated disconnect keeps the remaining script
        if self.opens == 0 {
            let samples = resample(&self.samples, self.sample_rate, format.sample_rate)?;
            let mut assembler = FrameAssembler::new(format);
            let mut frames = VecDeque::new();
            assembler.push(&samples, |f| frames.push_back(f));

            let tail = samples.len() % format.frame_len().max(1);
            if tail > 0 {
                assembler.push(&vec![0.0; format.frame_len() - tail], |f| frames.push_back(f));
            }

            self.frames = frames;
            self.samples = Vec::new();
        }
        let now = Instant::now();
        self.started = Some(now.checked_sub(self.next_timestamp).unwrap_or(now));
        self.format = format;
        self.opens += 1;

        tracing::debug!(source = %self.name, frames = self.frames.len(), "scripted source opened");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        let Some(started) = self.started else {
            return Err(Error::Device("source not open".to_string()));
        };

        if self.failures.front() == Some(&self.delivered) {
            self.failures.pop_front();
            self.started = None;
            return Err(Error::Device("simulated disconnect".to_string()));
        }

        let timestamp = match self.frames.front() {
            Some(frame) => frame.timestamp(),
            None if self.then_silence => self.next_timestamp,
            None => return Err(Error::SourceExhausted),
        };

        match self.pacing {
            Pacing::RealTime => tokio::time::sleep_until(started + timestamp).await,
            Pacing::Unpaced => tokio::task::yield_now().await,
        }

        let frame = match self.frames.pop_front() {
            Some(frame) => frame,
            None => self.silence_frame(),
        };
        self.next_timestamp = frame.end();
        self.delivered += 1;
        Ok(frame)
    }

    fn discard_pending(&mut self) -> usize {
        // A script has no device backlog; real-time pacing skips to now
        if self.pacing == Pacing::RealTime
            && let Some(started) = self.started
        {
            let now = started.elapsed();
            let before = self.frames.len();
            while self.frames.front().is_some_and(|f| f.end() <= now) {
                self.frames.pop_front();
            }
            return before - self.frames.len();
        }
        0
    }

    fn close(&mut self) {
        if self.started.is_some() {
            tracing::debug!(source = %self.name, "scripted source closed");
        }
        self.started = None;
    }
}
