//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use mirror_voice::actions::{Action, ActionRegistry};
use mirror_voice::config::SpotterKind;
use mirror_voice::nlu::{ChatResponder, IntentResolver, IntentResult, PatternResolver};
use mirror_voice::session::{Operator, Pipeline, SessionEvent, SessionState};
use mirror_voice::voice::{AudioFrame, SAMPLE_RATE, Speaker, Transcriber, Utterance};
use mirror_voice::{Config, Error, Result};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs).round() as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration_secs).round() as usize]
}

/// Concatenate audio segments
pub fn concat(parts: &[Vec<f32>]) -> Vec<f32> {
    parts.iter().flatten().copied().collect()
}

/// 100 ms frames at constant levels, starting at `start_ms`
pub fn level_frames(levels: &[f32], start_ms: u64) -> Vec<AudioFrame> {
    levels
        .iter()
        .zip(0u64..)
        .map(|(&level, i)| {
            AudioFrame::new(
                Duration::from_millis(start_ms + 100 * i),
                SAMPLE_RATE,
                vec![level; 1600],
            )
        })
        .collect()
}

/// Defaults with the wake detector left to operator triggers
pub fn manual_config() -> Config {
    let mut config = Config::default();
    config.wake.spotter = SpotterKind::Manual;
    config
}

/// How a mocked backend answers
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Fail,
    Hang,
}

impl Behavior {
    pub fn reply(text: &str) -> Self {
        Self::Reply(text.to_string())
    }

    async fn run(&self, error: impl FnOnce() -> Error) -> Result<String> {
        match self {
            Self::Reply(text) => Ok(text.clone()),
            Self::Fail => Err(error()),
            Self::Hang => std::future::pending().await,
        }
    }
}

pub struct MockTranscriber {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        assert!(!utterance.is_empty(), "empty utterances are never transcribed");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior
            .run(|| Error::Recognition("backend unavailable".to_string()))
            .await
    }
}

/// How a backend without a scripted reply misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Fail,
    Hang,
}

/// Keyword rules, or a resolver fault
pub struct MockResolver {
    fault: Option<Fault>,
}

#[async_trait]
impl IntentResolver for MockResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, text: &str) -> Result<IntentResult> {
        match self.fault {
            Some(Fault::Fail) => Err(Error::Intent("model unavailable".to_string())),
            Some(Fault::Hang) => std::future::pending().await,
            None => PatternResolver::new().resolve(text).await,
        }
    }
}

pub struct MockChat {
    behavior: Behavior,
}

#[async_trait]
impl ChatResponder for MockChat {
    async fn reply(&self, _text: &str) -> Result<String> {
        self.behavior
            .run(|| Error::Chat("model unavailable".to_string()))
            .await
    }
}

pub struct MockWeather {
    behavior: Behavior,
}

#[async_trait]
impl Action for MockWeather {
    fn name(&self) -> &str {
        "weather"
    }

    async fn execute(&self, _intent: &IntentResult) -> Result<String> {
        self.behavior
            .run(|| Error::action("weather", "Sorry, the clouds hide the sky from me"))
            .await
    }
}

/// Records what would have been spoken
pub struct RecordingSpeaker {
    spoken: Arc<Mutex<Vec<String>>>,
    fault: Option<Fault>,
    wake_while_speaking: Option<Operator>,
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    fn name(&self) -> &str {
        "recording"
    }

    async fn speak(&self, text: &str) -> Result<()> {
        if let Some(operator) = &self.wake_while_speaking {
            operator.wake();
        }
        self.spoken.lock().unwrap().push(text.to_string());
        match self.fault {
            Some(Fault::Fail) => Err(Error::Playback("speaker unplugged".to_string())),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

/// Mocked pipeline behaviors
#[derive(Debug, Clone)]
pub struct Mocks {
    pub transcriber: Behavior,
    pub resolver: Option<Fault>,
    pub chat: Behavior,
    pub weather: Behavior,
    pub speaker: Option<Fault>,
    pub wake_while_speaking: Option<Operator>,
}

impl Default for Mocks {
    fn default() -> Self {
        Self {
            transcriber: Behavior::reply("Hello, turn on the weather"),
            resolver: None,
            chat: Behavior::reply("The Mirror sees a question"),
            weather: Behavior::reply("It is 18 degrees and clear"),
            speaker: None,
            wake_while_speaking: None,
        }
    }
}

/// What the mocks observed
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub spoken: Arc<Mutex<Vec<String>>>,
    pub transcriptions: Arc<AtomicUsize>,
}

impl Observed {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn transcriptions(&self) -> usize {
        self.transcriptions.load(Ordering::SeqCst)
    }
}

impl Mocks {
    pub fn pipeline(&self) -> (Pipeline, Observed) {
        let observed = Observed::default();

        let mut actions = ActionRegistry::new();
        actions.register(Arc::new(MockWeather {
            behavior: self.weather.clone(),
        }));

        let pipeline = Pipeline {
            transcriber: Box::new(MockTranscriber {
                behavior: self.transcriber.clone(),
                calls: Arc::clone(&observed.transcriptions),
            }),
            resolver: Box::new(MockResolver {
                fault: self.resolver,
            }),
            chat: Box::new(MockChat {
                behavior: self.chat.clone(),
            }),
            actions,
            speaker: Box::new(RecordingSpeaker {
                spoken: Arc::clone(&observed.spoken),
                fault: self.speaker,
                wake_while_speaking: self.wake_while_speaking.clone(),
            }),
        };

        (pipeline, observed)
    }
}

/// Everything already sent on an event channel
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Target states of every transition, in order
pub fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
