//! Wake word detection
//!
//! The detector keeps a short rolling window of frames and asks a pluggable
//! [`KeywordSpotter`] whether the window ends in a wake phrase. It never
//! touches the network or disk, so it can run on every frame while idle.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{SpotterKind, WakeConfig};
use crate::voice::{AudioFormat, AudioFrame};

/// Where a wake event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOrigin {
    /// Keyword spotter match
    Detector,
    /// Operator trigger
    Manual,
}

impl std::fmt::Display for WakeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detector => write!(f, "detector"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A wake trigger; starts exactly one session cycle
#[derive(Debug, Clone, PartialEq)]
pub struct WakeEvent {
    /// Stream offset at which the trigger completed
    pub timestamp: Duration,
    /// Spotter confidence in [0, 1]
    pub confidence: f32,
    /// Configured wake phrase
    pub phrase: String,
    pub origin: WakeOrigin,
}

impl WakeEvent {
    /// An operator-initiated wake
    #[must_use]
    pub fn manual(timestamp: Duration, phrase: impl Into<String>) -> Self {
        Self {
            timestamp,
            confidence: 1.0,
            phrase: phrase.into(),
            origin: WakeOrigin::Manual,
        }
    }
}

/// Bounded window of the most recent frames
#[derive(Debug)]
pub struct RollingWindow {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl RollingWindow {
    /// Create a window holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Frames oldest first
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = &AudioFrame> + ExactSizeIterator {
        self.frames.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Remove and return every frame, oldest first
    pub fn take(&mut self) -> Vec<AudioFrame> {
        std::mem::take(&mut self.frames).into()
    }
}

/// Acoustic matcher run by the detector on every frame
pub trait KeywordSpotter: Send {
    /// Spotter name for logs
    fn name(&self) -> &'static str;

    /// Whether the window ends in a wake phrase; returns the confidence
    fn spot(&mut self, window: &RollingWindow) -> Option<f32>;

    /// Forget any internal state
    fn reset(&mut self) {}
}

/// Matches a short voiced burst followed by a pause
///
/// A burst is the span between the first and last voiced frame, bounded on
/// the left by silence at least as long as the trailing gap. It matches on
/// the exact frame where the trailing pause reaches `gap_frames`, so one
/// burst matches once. Bursts that run into the start of the window are
/// ignored since their true length is unknown.
#[derive(Debug, Clone)]
pub struct EnergySpotter {
    threshold: f32,
    min_frames: usize,
    max_frames: usize,
    gap_frames: usize,
}

impl EnergySpotter {
    /// Create a spotter with burst bounds expressed in frames
    #[must_use]
    pub fn new(threshold: f32, min_frames: usize, max_frames: usize, gap_frames: usize) -> Self {
        Self {
            threshold,
            min_frames: min_frames.max(1),
            max_frames: max_frames.max(min_frames.max(1)),
            gap_frames: gap_frames.max(1),
        }
    }

    /// Create a spotter from config durations
    #[must_use]
    pub fn from_config(config: &WakeConfig, format: AudioFormat) -> Self {
        Self::new(
            config.energy_threshold,
            format.frames_in(config.min_burst),
            format.frames_in(config.max_burst),
            format.frames_in(config.trailing_gap),
        )
    }

    /// Window length this spotter needs to see a whole burst and its pauses
    #[must_use]
    pub const fn frames_needed(&self) -> usize {
        self.max_frames + 2 * self.gap_frames
    }

    fn is_voiced(&self, frame: &AudioFrame) -> bool {
        frame.energy() > self.threshold
    }
}

impl KeywordSpotter for EnergySpotter {
    fn name(&self) -> &'static str {
        "energy"
    }

    #[allow(clippy::cast_precision_loss)]
    fn spot(&mut self, window: &RollingWindow) -> Option<f32> {
        let mut frames = window.frames().rev();

        // Trailing pause must have just reached the gap length
        for _ in 0..self.gap_frames {
            if self.is_voiced(frames.next()?) {
                return None;
            }
        }

        let mut span = 0usize;
        let mut pending_silence = 0usize;
        let mut voiced = 0usize;
        let mut energy = 0.0f32;
        let mut bounded = false;

        for frame in frames {
            if self.is_voiced(frame) {
                span += pending_silence + 1;
                pending_silence = 0;
                voiced += 1;
                energy += frame.energy();
                if span > self.max_frames {
                    return None;
                }
            } else if voiced == 0 {
                // Frame before the gap is silent, so the gap is longer than needed
                return None;
            } else {
                pending_silence += 1;
                if pending_silence >= self.gap_frames {
                    bounded = true;
                    break;
                }
            }
        }

        // Reaching the window start through silence still bounds the burst
        if !bounded && pending_silence == 0 {
            return None;
        }
        if span < self.min_frames {
            return None;
        }

        let mean = energy / voiced as f32;
        Some(mean / (mean + self.threshold))
    }
}

/// Never matches; the session is woken by the operator only
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualSpotter;

impl KeywordSpotter for ManualSpotter {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn spot(&mut self, _window: &RollingWindow) -> Option<f32> {
        None
    }
}

/// Whether the detector is listening for a wake phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Consuming frames
    Armed,
    /// Fired; ignoring frames until re-armed
    Suspended,
}

/// Detects wake phrases in the idle audio stream
pub struct WakeWordDetector {
    phrase: String,
    spotter: Box<dyn KeywordSpotter>,
    window: RollingWindow,
    debounce: Duration,
    last_fired: Option<Duration>,
    state: DetectorState,
}

impl WakeWordDetector {
    /// Create a detector around `spotter`
    ///
    /// # Arguments
    ///
    /// * `phrase` - Wake phrase reported on events (e.g. "hello")
    /// * `window_frames` - Rolling window length in frames
    /// * `debounce` - Minimum stream time between two events
    #[must_use]
    pub fn new(
        phrase: impl Into<String>,
        spotter: Box<dyn KeywordSpotter>,
        window_frames: usize,
        debounce: Duration,
    ) -> Self {
        let phrase = phrase.into().trim().to_lowercase();
        tracing::debug!(
            phrase = %phrase,
            spotter = spotter.name(),
            window_frames,
            ?debounce,
            "wake word detector initialized"
        );

        Self {
            phrase,
            spotter,
            window: RollingWindow::new(window_frames),
            debounce,
            last_fired: None,
            state: DetectorState::Armed,
        }
    }

    /// Build the configured detector
    #[must_use]
    pub fn from_config(config: &WakeConfig, format: AudioFormat) -> Self {
        let mut window_frames = format.frames_in(config.window);
        let spotter: Box<dyn KeywordSpotter> = match config.spotter {
            SpotterKind::Energy => {
                let spotter = EnergySpotter::from_config(config, format);
                window_frames = window_frames.max(spotter.frames_needed());
                Box::new(spotter)
            }
            SpotterKind::Manual => Box::new(ManualSpotter),
        };

        Self::new(config.phrase.clone(), spotter, window_frames, config.debounce)
    }

    /// Process one frame
    ///
    /// Returns a wake event at most once per debounce window. After firing
    /// the detector is suspended until [`rearm`](Self::rearm).
    pub fn feed(&mut self, frame: &AudioFrame) -> Option<WakeEvent> {
        if self.state == DetectorState::Suspended {
            return None;
        }

        let started = Instant::now();
        self.window.push(frame.clone());
        let hit = self.spotter.spot(&self.window);

        let elapsed = started.elapsed();
        if elapsed > frame.duration() {
            tracing::warn!(
                spotter = self.spotter.name(),
                ?elapsed,
                budget = ?frame.duration(),
                "wake detection slower than real time"
            );
        }

        let confidence = hit?;
        let at = frame.end();

        if let Some(last) = self.last_fired
            && at.saturating_sub(last) < self.debounce
        {
            tracing::debug!(?at, ?last, "wake match inside debounce window, ignored");
            return None;
        }

        self.last_fired = Some(at);
        self.state = DetectorState::Suspended;
        tracing::info!(phrase = %self.phrase, confidence, timestamp = ?at, "wake word detected");

        Some(WakeEvent {
            timestamp: at,
            confidence,
            phrase: self.phrase.clone(),
            origin: WakeOrigin::Detector,
        })
    }

    /// Audio the last match was found in, oldest first
    ///
    /// Empties the window; the frames belong to the cycle from here on.
    pub fn take_heard(&mut self) -> Vec<AudioFrame> {
        self.window.take()
    }

    /// Stop consuming frames (a cycle started from a manual wake)
    pub fn suspend(&mut self) {
        self.state = DetectorState::Suspended;
    }

    /// Resume detection with an empty window
    pub fn rearm(&mut self) {
        self.window.clear();
        self.spotter.reset();
        self.state = DetectorState::Armed;
        tracing::trace!("wake word detector re-armed");
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state == DetectorState::Armed
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Get the configured wake phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}
