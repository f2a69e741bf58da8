//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, SttBackend};
use crate::voice::Utterance;
use crate::{Error, Result};

/// Converts a captured utterance to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Transcribe the utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Recognition` or `Error::Http` on failure
    async fn transcribe(&self, utterance: &Utterance) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech with a cloud API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttBackend,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(SttBackend::Whisper, api_key, model)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(SttBackend::Deepgram, api_key, model)
    }

    fn new(provider: SttBackend, api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("API key required for {provider:?} STT")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe_wav(&self, audio: Vec<u8>) -> Result<String> {
        match self.provider {
            SttBackend::Whisper => self.transcribe_whisper(audio).await,
            SttBackend::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Recognition(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Recognition(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;

        Ok(result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    fn name(&self) -> &str {
        match self.provider {
            SttBackend::Whisper => "whisper",
            SttBackend::Deepgram => "deepgram",
        }
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        let wav = utterance.to_wav()?;
        let text = self.transcribe_wav(wav).await?;
        tracing::info!(transcript = %text, backend = self.name(), "transcription complete");
        Ok(text)
    }
}

/// Build the configured transcriber
///
/// # Errors
///
/// Returns `Error::Config` if the backend's API key is missing
pub fn transcriber_from_config(config: &Config) -> Result<Box<dyn Transcriber>> {
    let model = config.stt.model().to_string();
    let stt = match config.stt.backend {
        SttBackend::Whisper => {
            let key = config.api_keys.openai.clone().ok_or_else(|| {
                Error::Config("OPENAI_API_KEY required for Whisper".to_string())
            })?;
            SpeechToText::new_whisper(key, model)?
        }
        SttBackend::Deepgram => {
            let key = config.api_keys.deepgram.clone().ok_or_else(|| {
                Error::Config("DEEPGRAM_API_KEY required for Deepgram".to_string())
            })?;
            SpeechToText::new_deepgram(key, model)?
        }
    };
    Ok(Box::new(stt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let result = SpeechToText::new_whisper(SecretString::from(String::new()), "whisper-1".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_factory_requires_key() {
        let config = Config::default();
        assert!(transcriber_from_config(&config).is_err());
    }

    #[test]
    fn test_factory_selects_backend() {
        let mut config = Config::default();
        config.stt.backend = SttBackend::Deepgram;
        config.api_keys.deepgram = Some(SecretString::from("dg".to_string()));

        let stt = transcriber_from_config(&config).unwrap();
        assert_eq!(stt.name(), "deepgram");
    }

    #[test]
    fn test_deepgram_response_shape() {
        let body = r#"{"results":{"channels":[{"alternatives":[{"transcript":"what is the weather"}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.results.channels[0].alternatives[0].transcript,
            "what is the weather"
        );
    }
}
