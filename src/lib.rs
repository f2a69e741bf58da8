//! Mirror Voice - wake-word voice assistant front-end
//!
//! This library provides the pieces of a voice assistant built around one
//! session state machine:
//! - Audio capture, wake detection and utterance capture
//! - Speech recognition and synthesis backends
//! - Intent resolution (keyword rules or an LLM) and chat replies
//! - Predefined actions (weather, news)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Audio source (mic)                   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ frames
//! ┌────────────────────▼────────────────────────────────┐
//! │   Session state machine                              │
//! │   IDLE → LISTENING → TRANSCRIBING → THINKING         │
//! │        → ACTING / CHATTING → SPEAKING → IDLE         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   STT  │  NLU / LLM  │  Actions  │  TTS + playback   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod nlu;
pub mod session;
pub mod voice;

pub use actions::{Action, ActionRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use nlu::{IntentKind, IntentResult};
pub use session::{Operator, Pipeline, SessionEvent, SessionMachine, SessionState};
