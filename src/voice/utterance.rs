//! Utterance capture after a wake trigger

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::CaptureConfig;
use crate::session::Signals;
use crate::voice::{AudioFormat, AudioFrame, AudioSource, samples_to_wav};
use crate::{Error, Result};

/// Why capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Silence persisted after speech
    Silence,
    /// Hard cap reached; the audio is truncated
    MaxDuration,
    /// Operator stop
    ManualStop,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silence => write!(f, "silence-timeout"),
            Self::MaxDuration => write!(f, "max-duration"),
            Self::ManualStop => write!(f, "manual-stop"),
        }
    }
}

/// Audio captured for one session cycle
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    started_at: Duration,
    wall_start: DateTime<Utc>,
    end_reason: EndReason,
    voiced_frames: usize,
}

impl Utterance {
    /// Build an utterance, counting frames above `silence_threshold` as voiced
    ///
    /// `wall_start` is when capture began, not when it ended.
    #[must_use]
    pub fn from_frames(
        frames: Vec<AudioFrame>,
        end_reason: EndReason,
        silence_threshold: f32,
        wall_start: DateTime<Utc>,
    ) -> Self {
        let voiced_frames = frames
            .iter()
            .filter(|f| f.energy() > silence_threshold)
            .count();
        let started_at = frames.first().map_or(Duration::ZERO, AudioFrame::timestamp);

        Self {
            frames,
            started_at,
            wall_start,
            end_reason,
            voiced_frames,
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Stream offset of the first frame
    #[must_use]
    pub const fn started_at(&self) -> Duration {
        self.started_at
    }

    /// Wall-clock time capture began
    #[must_use]
    pub const fn wall_start(&self) -> DateTime<Utc> {
        self.wall_start
    }

    #[must_use]
    pub const fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    #[must_use]
    pub const fn voiced_frames(&self) -> usize {
        self.voiced_frames
    }

    /// Nothing voiced was captured
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.voiced_frames == 0
    }

    /// Total audio duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// Sample rate of the captured frames
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map_or(0, AudioFrame::sample_rate)
    }

    /// Concatenated samples
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        let len = self.frames.iter().map(|f| f.samples().len()).sum();
        let mut samples = Vec::with_capacity(len);
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }

    /// Encode as 16-bit PCM WAV for recognition backends
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), self.sample_rate())
    }
}

/// Accumulates frames and decides when an utterance is over
struct Recording {
    frames: Vec<AudioFrame>,
    prefix: usize,
    wall_start: DateTime<Utc>,
    silence_threshold: f32,
    silence_frames: usize,
    max_frames: usize,
    speech_started: bool,
    trailing_silence: usize,
}

impl Recording {
    fn push(&mut self, frame: AudioFrame) -> Option<EndReason> {
        if frame.energy() > self.silence_threshold {
            self.speech_started = true;
            self.trailing_silence = 0;
        } else if self.speech_started {
            self.trailing_silence += 1;
        }
        self.frames.push(frame);

        if self.speech_started && self.trailing_silence >= self.silence_frames {
            Some(EndReason::Silence)
        } else if self.frames.len() - self.prefix >= self.max_frames {
            Some(EndReason::MaxDuration)
        } else {
            None
        }
    }

    fn finish(self, reason: EndReason) -> Utterance {
        Utterance::from_frames(self.frames, reason, self.silence_threshold, self.wall_start)
    }
}

/// Records from the audio source until the speaker stops
#[derive(Debug, Clone)]
pub struct UtteranceCapturer {
    silence_threshold: f32,
    silence_frames: usize,
    max_frames: usize,
    stall_limit: Duration,
}

impl UtteranceCapturer {
    /// Create a capturer from config
    #[must_use]
    pub fn new(config: &CaptureConfig, format: AudioFormat) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            silence_frames: format.frames_in(config.silence_duration).max(1),
            max_frames: format.frames_in(config.max_duration).max(1),
            stall_limit: config.max_duration + config.stall_grace,
        }
    }

    /// Capture one utterance
    ///
    /// `prefix` is audio already heard before capture began (the wake
    /// phrase). It leads the utterance but does not count toward speech
    /// onset, the trailing pause or the hard cap.
    ///
    /// Silence is only counted after the first voiced frame, so input that
    /// never becomes voiced runs to the hard cap. A stop or shutdown ends
    /// capture at once with [`EndReason::ManualStop`]. If the device stops
    /// delivering frames, capture is cut off at the wall-clock limit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the source fails
    pub async fn capture(
        &self,
        source: &mut dyn AudioSource,
        prefix: Vec<AudioFrame>,
        signals: &mut Signals,
    ) -> Result<Utterance> {
        let prefix_len = prefix.len();
        let mut frames = Vec::with_capacity(self.max_frames + prefix_len);
        frames.extend(prefix);

        let mut recording = Recording {
            frames,
            prefix: prefix_len,
            wall_start: Utc::now(),
            silence_threshold: self.silence_threshold,
            silence_frames: self.silence_frames,
            max_frames: self.max_frames,
            speech_started: false,
            trailing_silence: 0,
        };

        let deadline = Instant::now() + self.stall_limit;

        loop {
            let frame = tokio::select! {
                biased;
                interrupt = signals.interrupted() => {
                    tracing::debug!(?interrupt, frames = recording.frames.len(), "capture interrupted");
                    return Ok(recording.finish(EndReason::ManualStop));
                }
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(limit = ?self.stall_limit, "audio stalled during capture");
                    return Ok(recording.finish(EndReason::MaxDuration));
                }
                frame = source.read_frame() => frame,
            };

            match frame {
                Ok(frame) => {
                    if let Some(reason) = recording.push(frame) {
                        let utterance = recording.finish(reason);
                        tracing::debug!(
                            reason = %reason,
                            duration = ?utterance.duration(),
                            voiced = utterance.voiced_frames(),
                            "utterance captured"
                        );
                        return Ok(utterance);
                    }
                }
                // End of a finite source ends the utterance like silence would
                Err(Error::SourceExhausted) => {
                    let reason = if recording.speech_started {
                        EndReason::Silence
                    } else {
                        EndReason::MaxDuration
                    };
                    return Ok(recording.finish(reason));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
