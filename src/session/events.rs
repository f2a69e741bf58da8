//! Typed session events for observers (status view, transcript journal)

use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::SessionState;
use crate::nlu::IntentKind;
use crate::voice::{EndReason, WakeOrigin};

/// Capacity of the event channel; slow subscribers see `Lagged`
pub const EVENT_CAPACITY: usize = 64;

/// Something the session did
///
/// `cycle` identifies one wake → idle round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        cycle: Option<Uuid>,
        from: SessionState,
        to: SessionState,
    },
    WakeDetected {
        cycle: Uuid,
        origin: WakeOrigin,
        confidence: f32,
    },
    UtteranceCaptured {
        cycle: Uuid,
        duration: Duration,
        end_reason: EndReason,
        voiced_frames: usize,
    },
    /// A detector wake whose transcript lacks the wake phrase
    WakeDismissed {
        cycle: Uuid,
        transcript: String,
    },
    Transcribed {
        cycle: Uuid,
        text: String,
    },
    IntentResolved {
        cycle: Uuid,
        kind: IntentKind,
        payload: String,
    },
    Responded {
        cycle: Uuid,
        text: String,
    },
    StageFailed {
        cycle: Uuid,
        stage: &'static str,
        error: String,
    },
    /// The wake detector listens again; always follows the return to idle
    DetectorRearmed,
    /// The audio device was lost and reopened
    DeviceRecovered,
}

impl SessionEvent {
    /// Cycle the event belongs to, if any
    #[must_use]
    pub const fn cycle(&self) -> Option<Uuid> {
        match self {
            Self::StateChanged { cycle, .. } => *cycle,
            Self::WakeDetected { cycle, .. }
            | Self::UtteranceCaptured { cycle, .. }
            | Self::WakeDismissed { cycle, .. }
            | Self::Transcribed { cycle, .. }
            | Self::IntentResolved { cycle, .. }
            | Self::Responded { cycle, .. }
            | Self::StageFailed { cycle, .. } => Some(*cycle),
            Self::DetectorRearmed | Self::DeviceRecovered => None,
        }
    }
}

/// Create the session event channel
#[must_use]
pub fn event_channel() -> broadcast::Sender<SessionEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}
