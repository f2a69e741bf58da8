//! Text-to-speech (TTS) and spoken output

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::{AudioPlayback, PlaybackEnd};
use crate::config::{Config, TtsBackend};
use crate::{Error, Result};

/// Turns response text into audible speech
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Synthesize and play `text`, returning when playback completes
    ///
    /// Dropping the returned future stops playback.
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` or `Error::Playback` on failure
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Cloud synthesis service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    ElevenLabs,
}

impl TtsProvider {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::ElevenLabs => "elevenlabs",
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, voice: String, speed: f32, model: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model: model.unwrap_or_else(|| "tts-1".to_string()),
            provider: TtsProvider::OpenAi,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0,
            model: model.unwrap_or_else(|| "eleven_monolingual_v1".to_string()),
            provider: TtsProvider::ElevenLabs,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Raises the stop flag when the speak future is dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Cloud TTS played through the default output device
pub struct CloudSpeaker {
    tts: TextToSpeech,
    poll_interval: Duration,
}

impl CloudSpeaker {
    #[must_use]
    pub const fn new(tts: TextToSpeech, poll_interval: Duration) -> Self {
        Self { tts, poll_interval }
    }
}

#[async_trait]
impl Speaker for CloudSpeaker {
    fn name(&self) -> &str {
        self.tts.provider.name()
    }

    async fn speak(&self, text: &str) -> Result<()> {
        let mp3 = self.tts.synthesize(text).await?;
        tracing::debug!(bytes = mp3.len(), "speech synthesized");

        let stop = Arc::new(AtomicBool::new(false));
        let guard = StopOnDrop(Arc::clone(&stop));
        let poll = self.poll_interval;

        let end = tokio::task::spawn_blocking(move || {
            let playback = AudioPlayback::new()?;
            playback.play_mp3(&mp3, &stop, poll)
        })
        .await
        .map_err(|e| Error::Playback(format!("playback task failed: {e}")))??;

        drop(guard);
        if end == PlaybackEnd::Stopped {
            tracing::debug!("playback stopped early");
        }
        Ok(())
    }
}

/// Prints responses instead of speaking them
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

#[async_trait]
impl Speaker for ConsoleSpeaker {
    fn name(&self) -> &str {
        "console"
    }

    async fn speak(&self, text: &str) -> Result<()> {
        println!("mirror> {text}");
        Ok(())
    }
}

/// Build the configured speaker
///
/// # Errors
///
/// Returns `Error::Config` if the backend's API key is missing
pub fn speaker_from_config(config: &Config) -> Result<Box<dyn Speaker>> {
    let tts = &config.tts;
    let poll = config.session.poll_interval;

    let speaker: Box<dyn Speaker> = match tts.backend {
        TtsBackend::OpenAi => {
            let key = config.api_keys.openai.clone().ok_or_else(|| {
                Error::Config("OPENAI_API_KEY required for OpenAI TTS".to_string())
            })?;
            let engine = TextToSpeech::new_openai(key, tts.voice.clone(), tts.speed, tts.model.clone())?;
            Box::new(CloudSpeaker::new(engine, poll))
        }
        TtsBackend::ElevenLabs => {
            let key = config.api_keys.elevenlabs.clone().ok_or_else(|| {
                Error::Config("ELEVENLABS_API_KEY required for ElevenLabs TTS".to_string())
            })?;
            let engine = TextToSpeech::new_elevenlabs(key, tts.voice.clone(), tts.model.clone())?;
            Box::new(CloudSpeaker::new(engine, poll))
        }
        TtsBackend::Console => Box::new(ConsoleSpeaker),
    };

    Ok(speaker)
}
