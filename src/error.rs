//! Error types for the voice front-end

use std::time::Duration;

use thiserror::Error;

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front-end
///
/// None of these escape the session state machine: every stage failure is
/// recovered locally and the session returns to idle.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone unavailable or disconnected
    #[error("audio device error: {0}")]
    Device(String),

    /// Audio source has no more frames (finite sources only)
    #[error("audio source exhausted")]
    SourceExhausted,

    /// Audio encoding or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recognition failed (network, backend, empty transcript)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Intent resolution failed
    #[error("intent error: {0}")]
    Intent(String),

    /// A predefined action failed
    #[error("action '{action}' failed: {reason}")]
    Action {
        /// Registered action name
        action: String,
        /// Apology spoken to the user
        reason: String,
    },

    /// Chat generation failed
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech synthesis failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio playback failed
    #[error("playback error: {0}")]
    Playback(String),

    /// A pipeline stage exceeded its deadline
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Stage name
        stage: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Build an action failure for the named action
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }
}
