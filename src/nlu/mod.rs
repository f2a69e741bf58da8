//! Intent resolution and chat replies
//!
//! A transcript is first resolved into an [`IntentResult`]: either a named
//! predefined action or free conversation. Conversation goes to a
//! [`ChatResponder`].

mod llm;
mod pattern;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::config::{Config, NluBackend};
use crate::Result;

pub use llm::{LlmChat, LlmClient, LlmResolver};
pub use pattern::PatternResolver;

/// Whether an intent runs an action or gets a conversational reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// Predefined action; the payload is the action name
    Action,
    /// Conversation; the payload is the user's text
    Chat,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Outcome of intent resolution
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub kind: IntentKind,
    /// Action name or user text, depending on `kind`
    pub payload: String,
    /// Action parameters (e.g. `location`, `count`)
    pub params: BTreeMap<String, String>,
    pub confidence: f32,
}

impl IntentResult {
    /// An action intent
    #[must_use]
    pub fn action(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind: IntentKind::Action,
            payload: name.into(),
            params: BTreeMap::new(),
            confidence,
        }
    }

    /// A chat intent
    #[must_use]
    pub fn chat(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind: IntentKind::Chat,
            payload: text.into(),
            params: BTreeMap::new(),
            confidence,
        }
    }

    /// Attach a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a parameter
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Maps a transcript to an intent
#[async_trait]
pub trait IntentResolver: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Resolve the transcript
    ///
    /// # Errors
    ///
    /// Returns `Error::Intent` if the text cannot be interpreted
    async fn resolve(&self, text: &str) -> Result<IntentResult>;
}

/// Produces conversational replies
#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// Reply to the user's text
    ///
    /// # Errors
    ///
    /// Returns `Error::Chat` if no reply could be generated
    async fn reply(&self, text: &str) -> Result<String>;
}

/// Remove a leading wake phrase (and following punctuation) from a transcript
///
/// Matching is case-insensitive and only on whole words, so "hello there"
/// loses "hello" but "helloworld" is kept as is.
#[must_use]
pub fn strip_wake_phrase(transcript: &str, phrase: &str) -> String {
    let trimmed = transcript.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());
    let phrase = phrase.trim();

    if phrase.is_empty() {
        return transcript.trim().to_string();
    }

    let Some(head) = trimmed.get(..phrase.len()) else {
        return transcript.trim().to_string();
    };
    let rest = &trimmed[phrase.len()..];

    if !head.eq_ignore_ascii_case(phrase) || rest.starts_with(char::is_alphanumeric) {
        return transcript.trim().to_string();
    }

    rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
        .trim_end()
        .to_string()
}

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").expect("valid regex"));

/// Text following the first whole-word occurrence of the wake phrase
///
/// Returns `None` if the phrase was not said. Used to confirm a wake the
/// detector only heard as a burst of sound.
#[must_use]
pub fn after_wake_phrase(transcript: &str, phrase: &str) -> Option<String> {
    let wanted: Vec<String> = WORD_REGEX
        .find_iter(phrase)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if wanted.is_empty() {
        return Some(transcript.trim().to_string());
    }

    let words: Vec<_> = WORD_REGEX.find_iter(transcript).collect();
    let end = words
        .windows(wanted.len())
        .find(|window| {
            window
                .iter()
                .zip(&wanted)
                .all(|(word, want)| word.as_str().to_lowercase() == *want)
        })?
        .last()?
        .end();

    Some(
        transcript[end..]
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | ':' | ';'))
            .trim_end()
            .to_string(),
    )
}

/// Build the configured intent resolver
///
/// `actions` lists the registered action names the LLM may choose from.
#[must_use]
pub fn resolver_from_config(
    config: &Config,
    llm: &Arc<LlmClient>,
    actions: Vec<String>,
) -> Box<dyn IntentResolver> {
    match config.nlu.backend {
        NluBackend::Pattern => Box::new(PatternResolver::new()),
        NluBackend::Llm => Box::new(LlmResolver::new(Arc::clone(llm), actions)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_wake_phrase() {
        assert_eq!(
            strip_wake_phrase("Hello, what's the weather?", "hello"),
            "what's the weather?"
        );
        assert_eq!(strip_wake_phrase("Hello", "hello"), "");
        assert_eq!(strip_wake_phrase("  hello. Tell me the news", "Hello"), "Tell me the news");
    }

    #[test]
    fn test_strip_wake_phrase_keeps_other_text() {
        assert_eq!(strip_wake_phrase("turn on the weather", "hello"), "turn on the weather");
        assert_eq!(strip_wake_phrase("helloworld", "hello"), "helloworld");
        assert_eq!(strip_wake_phrase("say hello", "hello"), "say hello");
        assert_eq!(strip_wake_phrase("hi", "hello"), "hi");
    }

    #[test]
    fn test_after_wake_phrase() {
        assert_eq!(
            after_wake_phrase("Hello, turn on the weather", "hello").as_deref(),
            Some("turn on the weather")
        );
        assert_eq!(
            after_wake_phrase("Um, hello there. Read me the news", "hello").as_deref(),
            Some("there. Read me the news")
        );
        assert_eq!(
            after_wake_phrase("okay MAGIC mirror: who is the fairest", "magic mirror").as_deref(),
            Some("who is the fairest")
        );
        assert_eq!(after_wake_phrase("Hello!", "hello").as_deref(), Some(""));
    }

    #[test]
    fn test_after_wake_phrase_requires_the_phrase() {
        assert_eq!(after_wake_phrase("", "hello"), None);
        assert_eq!(after_wake_phrase("Thank you.", "hello"), None);
        assert_eq!(after_wake_phrase("helloworld", "hello"), None);
        assert_eq!(after_wake_phrase("magic wand mirror", "magic mirror"), None);
    }

    #[test]
    fn test_intent_params() {
        let intent = IntentResult::action("news", 0.9).with_param("count", "5");
        assert_eq!(intent.kind, IntentKind::Action);
        assert_eq!(intent.param("count"), Some("5"));
        assert_eq!(intent.param("location"), None);
    }
}
