//! TOML configuration file loading
//!
//! Supports `~/.config/mirror/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MirrorConfigFile {
    /// Microphone and framing
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake detection
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Utterance capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Stage timeouts and recovery
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Spoken fallback texts
    #[serde(default)]
    pub responses: ResponsesFileConfig,

    /// Speech recognition backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Intent resolution backend
    #[serde(default)]
    pub nlu: NluFileConfig,

    /// Chat model endpoint
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Built-in action settings
    #[serde(default)]
    pub actions: ActionsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Append transcripts and responses to this JSON-lines file
    pub transcript_log: Option<String>,
}

/// Audio input configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Input device name (default device when unset)
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    /// Frames buffered before the oldest is dropped
    pub queue_frames: Option<usize>,
}

/// Wake detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Phrase reported on wake events and stripped from transcripts
    pub phrase: Option<String>,
    /// "energy" or "manual"
    pub spotter: Option<String>,
    pub energy_threshold: Option<f32>,
    pub window_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub min_burst_ms: Option<u64>,
    pub max_burst_ms: Option<u64>,
    pub trailing_gap_ms: Option<u64>,
}

/// Utterance capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub silence_threshold: Option<f32>,
    pub silence_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    /// Extra wall-clock allowance before a stalled capture is cut off
    pub stall_grace_ms: Option<u64>,
}

/// Session timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub transcribe_timeout_ms: Option<u64>,
    pub resolve_timeout_ms: Option<u64>,
    pub respond_timeout_ms: Option<u64>,
    pub speak_timeout_ms: Option<u64>,
    pub device_retry_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Spoken fallback texts
#[derive(Debug, Default, Deserialize)]
pub struct ResponsesFileConfig {
    pub not_heard: Option<String>,
    pub unknown_action: Option<String>,
    pub chat_failed: Option<String>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub backend: Option<String>,
    pub model: Option<String>,
}

/// Intent resolution configuration
#[derive(Debug, Default, Deserialize)]
pub struct NluFileConfig {
    /// "pattern" or "llm"
    pub backend: Option<String>,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    pub url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai", "elevenlabs" or "console"
    pub backend: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Built-in action configuration
#[derive(Debug, Default, Deserialize)]
pub struct ActionsFileConfig {
    pub weather_location: Option<String>,
    pub weather_cache_secs: Option<u64>,
    pub news_feed_url: Option<String>,
    pub news_count: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub llm: Option<String>,
}

/// Load the TOML config file
///
/// An explicit path must exist and parse. The default path is optional: a
/// missing file yields defaults and a broken one is logged and ignored.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<MirrorConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(MirrorConfigFile::default());
    };

    if !path.exists() {
        return Ok(MirrorConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MirrorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MirrorConfigFile::default()
        }
    };

    Ok(config)
}

/// Return the config file path: `~/.config/mirror/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("mirror").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let file: MirrorConfigFile = toml::from_str(
            r#"
            [wake]
            phrase = "mirror mirror"
            debounce_ms = 1500

            [tts]
            backend = "console"
            "#,
        )
        .unwrap();

        assert_eq!(file.wake.phrase.as_deref(), Some("mirror mirror"));
        assert_eq!(file.wake.debounce_ms, Some(1500));
        assert_eq!(file.tts.backend.as_deref(), Some("console"));
        assert!(file.stt.backend.is_none());
        assert!(file.transcript_log.is_none());
    }

    #[test]
    fn test_explicit_file_loads() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[capture]\nsilence_ms = 900").unwrap();

        let file = load_config_file(Some(tmp.path())).unwrap();
        assert_eq!(file.capture.silence_ms, Some(900));
    }

    #[test]
    fn test_explicit_file_must_parse() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[capture\nsilence_ms = ").unwrap();

        assert!(matches!(
            load_config_file(Some(tmp.path())),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert!(matches!(
            load_config_file(Some(&missing)),
            Err(Error::Config(_))
        ));
    }
}
