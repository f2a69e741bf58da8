//! The session state machine
//!
//! One [`SessionMachine`] owns the session state, the wake detector and the
//! pipeline. While idle it feeds microphone frames to the detector; a wake
//! starts a cycle that captures, transcribes, resolves, responds and speaks.
//! Every stage is bounded by a timeout and can be abandoned by an operator
//! stop. Whatever happens, the cycle ends back in [`SessionState::Idle`] and
//! only then is the detector re-armed.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{SessionEvent, event_channel};
use super::signals::{Control, Interrupt, Signals};
use super::{Pipeline, SessionState};
use crate::config::{Config, SessionConfig};
use crate::nlu::{IntentKind, IntentResult, after_wake_phrase, strip_wake_phrase};
use crate::voice::{
    AudioFormat, AudioFrame, AudioSource, EndReason, UtteranceCapturer, WakeEvent, WakeOrigin,
    WakeWordDetector,
};
use crate::{Error, Result};

/// Outcome of one bounded stage
enum Stage<T> {
    Done(T),
    Failed(Error),
    Interrupted(Interrupt),
}

/// Run `work` under `limit`, abandoning it on stop or shutdown
async fn bounded<T>(
    signals: &mut Signals,
    stage: &'static str,
    limit: Duration,
    work: impl Future<Output = Result<T>>,
) -> Stage<T> {
    tokio::select! {
        biased;
        interrupt = signals.interrupted() => Stage::Interrupted(interrupt),
        outcome = tokio::time::timeout(limit, work) => match outcome {
            Ok(Ok(value)) => Stage::Done(value),
            Ok(Err(e)) => Stage::Failed(e),
            Err(_) => Stage::Failed(Error::Timeout { stage, after: limit }),
        },
    }
}

/// Why the idle loop stopped
enum Idle {
    /// Wake, with the audio the detector heard it in
    Wake(WakeEvent, Vec<AudioFrame>),
    Shutdown,
    Exhausted,
    DeviceLost(Error),
}

/// How a cycle ended; the session is idle again in every case
enum CycleEnd {
    Finished,
    Shutdown,
    DeviceLost(Error),
}

impl From<Interrupt> for CycleEnd {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Stop => Self::Finished,
            Interrupt::Shutdown => Self::Shutdown,
        }
    }
}

enum Next {
    Control(Control),
    Frame(Result<AudioFrame>),
}

/// Drives the wake → respond → idle lifecycle
pub struct SessionMachine {
    state: SessionState,
    cycle: Option<Uuid>,
    format: AudioFormat,
    settings: SessionConfig,
    wake_phrase: String,
    detector: WakeWordDetector,
    capturer: UtteranceCapturer,
    pipeline: Pipeline,
    signals: Signals,
    events: broadcast::Sender<SessionEvent>,
    position: Duration,
}

impl SessionMachine {
    /// Create a machine from config, backends and the operator signals
    #[must_use]
    pub fn new(config: &Config, pipeline: Pipeline, signals: Signals) -> Self {
        let format = config.audio.format;
        Self {
            state: SessionState::Idle,
            cycle: None,
            format,
            settings: config.session.clone(),
            wake_phrase: config.wake.phrase.clone(),
            detector: WakeWordDetector::from_config(&config.wake, format),
            capturer: UtteranceCapturer::new(&config.capture, format),
            pipeline,
            signals,
            events: event_channel(),
            position: Duration::ZERO,
        }
    }

    /// Replace the configured wake detector
    #[must_use]
    pub fn with_detector(mut self, detector: WakeWordDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Receive session events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn detector(&self) -> &WakeWordDetector {
        &self.detector
    }

    /// Run until shutdown or until a finite source is exhausted while idle
    ///
    /// Stage failures never escape; they are spoken or logged and the
    /// session returns to idle. A lost device is reopened after a backoff.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the source cannot be opened initially
    pub async fn run(&mut self, source: &mut dyn AudioSource) -> Result<()> {
        source.open(self.format).await?;
        self.signals.clear_stop();
        tracing::info!(
            source = source.name(),
            phrase = %self.wake_phrase,
            pipeline = ?self.pipeline,
            "session listening"
        );

        loop {
            let (wake, heard) = match self.listen(source).await {
                Idle::Wake(event, heard) => (event, heard),
                Idle::Shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Idle::Exhausted => {
                    tracing::info!(source = source.name(), "audio source exhausted");
                    break;
                }
                Idle::DeviceLost(e) => {
                    if self.recover(source, &e).await {
                        continue;
                    }
                    break;
                }
            };

            let end = self.run_cycle(source, wake, heard).await;
            self.return_to_idle(source);

            match end {
                CycleEnd::Finished => {}
                CycleEnd::Shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                CycleEnd::DeviceLost(e) => {
                    if !self.recover(source, &e).await {
                        break;
                    }
                }
            }
        }

        source.close();
        Ok(())
    }

    /// Feed frames to the detector until something wakes the session
    async fn listen(&mut self, source: &mut dyn AudioSource) -> Idle {
        loop {
            let next = tokio::select! {
                biased;
                control = self.signals.next_control() => Next::Control(control),
                frame = source.read_frame() => Next::Frame(frame),
            };

            match next {
                Next::Control(Control::Shutdown) => return Idle::Shutdown,
                Next::Control(Control::Wake) => {
                    let event = WakeEvent::manual(self.position, self.wake_phrase.clone());
                    return Idle::Wake(event, Vec::new());
                }
                Next::Frame(Ok(frame)) => {
                    self.position = frame.end();
                    if let Some(event) = self.detector.feed(&frame) {
                        return Idle::Wake(event, self.detector.take_heard());
                    }
                }
                Next::Frame(Err(Error::SourceExhausted)) => return Idle::Exhausted,
                Next::Frame(Err(e)) => return Idle::DeviceLost(e),
            }
        }
    }

    /// One full cycle, from the wake to the end of speaking
    async fn run_cycle(
        &mut self,
        source: &mut dyn AudioSource,
        wake: WakeEvent,
        heard: Vec<AudioFrame>,
    ) -> CycleEnd {
        let cycle = Uuid::new_v4();
        self.cycle = Some(cycle);
        self.signals.clear_stop();
        self.detector.suspend();

        tracing::info!(
            %cycle,
            origin = %wake.origin,
            confidence = wake.confidence,
            at = ?wake.timestamp,
            "wake"
        );
        self.emit(SessionEvent::WakeDetected {
            cycle,
            origin: wake.origin,
            confidence: wake.confidence,
        });
        self.transition(SessionState::Listening);

        let utterance = match self.capturer.capture(source, heard, &mut self.signals).await {
            Ok(utterance) => utterance,
            Err(e) => {
                self.fail("capture", &e);
                return CycleEnd::DeviceLost(e);
            }
        };

        if utterance.end_reason() == EndReason::ManualStop {
            tracing::info!("capture stopped by operator");
            return if self.signals.is_shutdown() {
                CycleEnd::Shutdown
            } else {
                CycleEnd::Finished
            };
        }
        if utterance.is_empty() {
            tracing::info!(reason = %utterance.end_reason(), "nothing voiced");
            return CycleEnd::Finished;
        }

        self.emit(SessionEvent::UtteranceCaptured {
            cycle,
            duration: utterance.duration(),
            end_reason: utterance.end_reason(),
            voiced_frames: utterance.voiced_frames(),
        });
        self.transition(SessionState::Transcribing);

        let transcript = match bounded(
            &mut self.signals,
            "transcribe",
            self.settings.transcribe_timeout,
            self.pipeline.transcriber.transcribe(&utterance),
        )
        .await
        {
            Stage::Done(text) => text,
            Stage::Failed(e) => return self.apologize("transcribe", &e).await,
            Stage::Interrupted(interrupt) => return interrupt.into(),
        };
        drop(utterance);

        // A detector wake is only a burst of sound until the phrase is heard
        let text = match wake.origin {
            WakeOrigin::Detector => {
                let Some(text) = after_wake_phrase(&transcript, &self.wake_phrase) else {
                    tracing::info!(%cycle, transcript = %transcript, "no wake phrase, ignoring wake");
                    self.emit(SessionEvent::WakeDismissed { cycle, transcript });
                    return CycleEnd::Finished;
                };
                text
            }
            WakeOrigin::Manual => strip_wake_phrase(&transcript, &self.wake_phrase),
        };
        if text.is_empty() {
            let e = Error::Recognition("empty transcript".to_string());
            return self.apologize("transcribe", &e).await;
        }

        tracing::info!(%cycle, text = %text, "heard");
        self.emit(SessionEvent::Transcribed {
            cycle,
            text: text.clone(),
        });
        self.transition(SessionState::Thinking);

        let intent = match bounded(
            &mut self.signals,
            "resolve",
            self.settings.resolve_timeout,
            self.pipeline.resolver.resolve(&text),
        )
        .await
        {
            Stage::Done(intent) => intent,
            Stage::Failed(e) => return self.apologize("resolve", &e).await,
            Stage::Interrupted(interrupt) => return interrupt.into(),
        };

        tracing::info!(
            kind = %intent.kind,
            payload = %intent.payload,
            confidence = intent.confidence,
            params = ?intent.params,
            "intent"
        );
        self.emit(SessionEvent::IntentResolved {
            cycle,
            kind: intent.kind,
            payload: intent.payload.clone(),
        });

        let response = match intent.kind {
            IntentKind::Action => {
                self.transition(SessionState::Acting);
                self.act(&intent).await
            }
            IntentKind::Chat => {
                self.transition(SessionState::Chatting);
                self.chat(&intent).await
            }
        };

        match response {
            Ok(text) => self.speak(&text).await,
            Err(interrupt) => interrupt.into(),
        }
    }

    /// Run the named action; failures become its apology
    async fn act(&mut self, intent: &IntentResult) -> std::result::Result<String, Interrupt> {
        let Some(action) = self.pipeline.actions.get(&intent.payload) else {
            let e = Error::action(intent.payload.clone(), "not registered");
            self.fail("act", &e);
            return Ok(self.settings.responses.unknown_action.clone());
        };

        match bounded(
            &mut self.signals,
            "act",
            self.settings.respond_timeout,
            action.execute(intent),
        )
        .await
        {
            Stage::Done(text) => Ok(text),
            Stage::Failed(e) => {
                self.fail("act", &e);
                Ok(match e {
                    Error::Action { reason, .. } => reason,
                    _ => self.settings.responses.unknown_action.clone(),
                })
            }
            Stage::Interrupted(interrupt) => Err(interrupt),
        }
    }

    async fn chat(&mut self, intent: &IntentResult) -> std::result::Result<String, Interrupt> {
        match bounded(
            &mut self.signals,
            "chat",
            self.settings.respond_timeout,
            self.pipeline.chat.reply(&intent.payload),
        )
        .await
        {
            Stage::Done(text) if !text.trim().is_empty() => Ok(text),
            Stage::Done(_) => {
                self.fail("chat", &Error::Chat("empty reply".to_string()));
                Ok(self.settings.responses.chat_failed.clone())
            }
            Stage::Failed(e) => {
                self.fail("chat", &e);
                Ok(self.settings.responses.chat_failed.clone())
            }
            Stage::Interrupted(interrupt) => Err(interrupt),
        }
    }

    /// Recognition failed: say so, then finish the cycle
    async fn apologize(&mut self, stage: &'static str, error: &Error) -> CycleEnd {
        self.fail(stage, error);
        let text = self.settings.responses.not_heard.clone();
        self.speak(&text).await
    }

    async fn speak(&mut self, text: &str) -> CycleEnd {
        self.transition(SessionState::Speaking);
        if let Some(cycle) = self.cycle {
            self.emit(SessionEvent::Responded {
                cycle,
                text: text.to_string(),
            });
        }
        tracing::info!(text, speaker = self.pipeline.speaker.name(), "speaking");

        match bounded(
            &mut self.signals,
            "speak",
            self.settings.speak_timeout,
            self.pipeline.speaker.speak(text),
        )
        .await
        {
            Stage::Done(()) => CycleEnd::Finished,
            Stage::Failed(e) => {
                self.fail("speak", &e);
                CycleEnd::Finished
            }
            Stage::Interrupted(interrupt) => interrupt.into(),
        }
    }

    /// Back to idle: drop stale audio and wakes, then re-arm the detector
    fn return_to_idle(&mut self, source: &mut dyn AudioSource) {
        self.transition(SessionState::Idle);
        self.cycle = None;

        let stale = source.discard_pending();
        let wakes = self.signals.drain_wakes();
        self.signals.clear_stop();
        if stale > 0 || wakes > 0 {
            tracing::debug!(stale_frames = stale, ignored_wakes = wakes, "discarded input from cycle");
        }

        self.detector.rearm();
        self.emit(SessionEvent::DetectorRearmed);
    }

    /// Reopen a lost device; false if shutdown arrived first
    async fn recover(&mut self, source: &mut dyn AudioSource, error: &Error) -> bool {
        let backoff = self.settings.device_retry_backoff;
        tracing::warn!(error = %error, source = source.name(), retry_in = ?backoff, "audio device lost");
        source.close();

        loop {
            tokio::select! {
                biased;
                () = self.signals.shutdown() => return false,
                () = tokio::time::sleep(backoff) => {}
            }

            match source.open(self.format).await {
                Ok(()) => {
                    tracing::info!(source = source.name(), "audio device reopened");
                    self.detector.rearm();
                    self.emit(SessionEvent::DeviceRecovered);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "audio device still unavailable");
                }
            }
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::error!(%from, %to, "transition outside the session lifecycle");
        }

        self.state = to;
        tracing::debug!(%from, %to, cycle = ?self.cycle, "state changed");
        self.emit(SessionEvent::StateChanged {
            cycle: self.cycle,
            from,
            to,
        });
    }

    fn fail(&self, stage: &'static str, error: &Error) {
        tracing::warn!(stage, error = %error, "stage failed");
        if let Some(cycle) = self.cycle {
            self.emit(SessionEvent::StageFailed {
                cycle,
                stage,
                error: error.to_string(),
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let (_operator, mut signals) = crate::session::channel();
        let stage = bounded(&mut signals, "transcribe", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match stage {
            Stage::Failed(Error::Timeout { stage, after }) => {
                assert_eq!(stage, "transcribe");
                assert_eq!(after, Duration::from_secs(1));
            }
            _ => panic!("expected a timeout"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_stops() {
        let (operator, mut signals) = crate::session::channel();
        signals.clear_stop();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            operator.stop();
            operator
        });

        let stage = bounded(&mut signals, "speak", Duration::from_secs(30), async {
            std::future::pending::<Result<()>>().await
        })
        .await;
        assert!(matches!(stage, Stage::Interrupted(Interrupt::Stop)));
        drop(stopper.await.unwrap());
    }

    #[test]
    fn test_interrupt_ends_cycle() {
        assert!(matches!(CycleEnd::from(Interrupt::Stop), CycleEnd::Finished));
        assert!(matches!(CycleEnd::from(Interrupt::Shutdown), CycleEnd::Shutdown));
        assert!(Speaking.can_transition_to(Idle));
    }
}
