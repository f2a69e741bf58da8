//! Keyword rules for predefined actions

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{IntentResolver, IntentResult};
use crate::{Error, Result};

/// Confidence reported for rule matches
const MATCH_CONFIDENCE: f32 = 0.9;

/// Confidence reported when nothing matched and the text goes to chat
const CHAT_CONFIDENCE: f32 = 0.5;

/// Action rules, checked in order
static RULES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    let rules: [(&str, &str); 2] = [
        (
            "weather",
            r"(?ix)
            \bweather\b | \bforecast\b | \btemperature\b
            | how\s+(?:hot|cold|warm)\s+is\s+it
            | is\s+it\s+(?:raining|snowing|sunny)
            | \bumbrella\b",
        ),
        (
            "news",
            r"(?ix)
            \bnews(?:paper)?\b | \bheadlines?\b
            | what'?s?\s+happening
            | what'?s?\s+going\s+on",
        ),
    ];

    rules
        .into_iter()
        .map(|(action, pattern)| (action, Regex::new(pattern).expect("valid regex")))
        .collect()
});

/// "in Paris", "for new york" at the end of a request
static LOCATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|for|at)\s+([a-z][a-z .'-]*?)(?:\s+(?:today|tomorrow|now|right\s+now))?\s*[?.!]*$")
        .expect("valid regex")
});

/// "5 news", "three headlines"
static COUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+|one|two|three|four|five|six|seven|eight|nine|ten)\s+(?:news|headlines?|stories|items)")
        .expect("valid regex")
});

/// Resolves intents with keyword rules; everything else is chat
#[derive(Debug, Default)]
pub struct PatternResolver;

impl PatternResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn params(action: &str, text: &str, mut intent: IntentResult) -> IntentResult {
        match action {
            "weather" => {
                if let Some(location) = LOCATION_REGEX
                    .captures(text)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim())
                    .filter(|l| !l.is_empty())
                {
                    intent = intent.with_param("location", location);
                }
            }
            "news" => {
                if let Some(count) = COUNT_REGEX
                    .captures(text)
                    .and_then(|c| c.get(1))
                    .and_then(|m| parse_count(m.as_str()))
                {
                    intent = intent.with_param("count", count.to_string());
                }
            }
            _ => {}
        }
        intent
    }
}

fn parse_count(word: &str) -> Option<usize> {
    const WORDS: [&str; 10] = [
        "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    ];
    word.parse().ok().or_else(|| {
        let lower = word.to_lowercase();
        WORDS.iter().position(|w| *w == lower).map(|i| i + 1)
    })
}

#[async_trait]
impl IntentResolver for PatternResolver {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn resolve(&self, text: &str) -> Result<IntentResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Intent("nothing to resolve".to_string()));
        }

        for (action, pattern) in RULES.iter() {
            if let Some(m) = pattern.find(text) {
                tracing::debug!(action, matched = m.as_str(), "pattern matched");
                let intent = IntentResult::action(*action, MATCH_CONFIDENCE);
                return Ok(Self::params(action, text, intent));
            }
        }

        Ok(IntentResult::chat(text, CHAT_CONFIDENCE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::IntentKind;

    async fn resolve(text: &str) -> IntentResult {
        PatternResolver::new().resolve(text).await.unwrap()
    }

    #[tokio::test]
    async fn test_weather_rule() {
        let intent = resolve("turn on the weather").await;
        assert_eq!(intent.kind, IntentKind::Action);
        assert_eq!(intent.payload, "weather");
        assert!(intent.params.is_empty());
    }

    #[tokio::test]
    async fn test_weather_location() {
        let intent = resolve("What's the weather in New York today?").await;
        assert_eq!(intent.payload, "weather");
        assert_eq!(intent.param("location"), Some("New York"));
    }

    #[tokio::test]
    async fn test_news_rules() {
        for text in ["show me the news", "any headlines?", "what's happening", "read the newspaper"] {
            let intent = resolve(text).await;
            assert_eq!(intent.payload, "news", "{text}");
        }
    }

    #[tokio::test]
    async fn test_news_count() {
        assert_eq!(resolve("give me 5 news").await.param("count"), Some("5"));
        assert_eq!(resolve("read three headlines").await.param("count"), Some("3"));
    }

    #[tokio::test]
    async fn test_everything_else_is_chat() {
        let intent = resolve("who is the fairest of them all").await;
        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.payload, "who is the fairest of them all");
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        assert!(PatternResolver::new().resolve("   ").await.is_err());
    }
}
