//! The heavy collaborators a session cycle calls into

use std::sync::Arc;

use crate::Result;
use crate::actions::ActionRegistry;
use crate::config::Config;
use crate::nlu::{ChatResponder, IntentResolver, LlmChat, LlmClient, resolver_from_config};
use crate::voice::{Speaker, Transcriber, speaker_from_config, transcriber_from_config};

/// Recognition and response backends used by one session
pub struct Pipeline {
    pub transcriber: Box<dyn Transcriber>,
    pub resolver: Box<dyn IntentResolver>,
    pub chat: Box<dyn ChatResponder>,
    pub actions: ActionRegistry,
    pub speaker: Box<dyn Speaker>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("transcriber", &self.transcriber.name())
            .field("resolver", &self.resolver.name())
            .field("actions", &self.actions.names())
            .field("speaker", &self.speaker.name())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build every backend selected in config
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a selected backend lacks its API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let transcriber = transcriber_from_config(config)?;
        let speaker = speaker_from_config(config)?;
        let actions = ActionRegistry::from_config(config);

        let llm = Arc::new(LlmClient::from_config(config));
        let resolver = resolver_from_config(config, &llm, actions.names());
        let chat: Box<dyn ChatResponder> = Box::new(LlmChat::new(llm));

        let pipeline = Self {
            transcriber,
            resolver,
            chat,
            actions,
            speaker,
        };
        tracing::info!(?pipeline, "pipeline ready");
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::config::{NluBackend, TtsBackend};

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.api_keys.openai = Some(SecretString::from("sk-test".to_string()));
        config.tts.backend = TtsBackend::Console;
        config.nlu.backend = NluBackend::Llm;

        let pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.transcriber.name(), "whisper");
        assert_eq!(pipeline.resolver.name(), "llm");
        assert_eq!(pipeline.speaker.name(), "console");
        assert_eq!(pipeline.actions.names(), vec!["news", "weather"]);
    }

    #[test]
    fn test_missing_stt_key() {
        let mut config = Config::default();
        config.tts.backend = TtsBackend::Console;
        assert!(Pipeline::from_config(&config).is_err());
    }
}
