//! OpenAI-compatible chat completions client, chat replies and
//! LLM-backed intent classification

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatResponder, IntentResolver, IntentResult};
use crate::config::Config;
use crate::{Error, Result};

/// Confidence assigned to LLM classifications of predefined actions
const ACTION_CONFIDENCE: f32 = 0.8;

/// Confidence assigned to LLM classifications of chat
const CHAT_CONFIDENCE: f32 = 0.6;

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct LlmClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("has_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client for `url` (the API base, e.g. `https://api.openai.com/v1`)
    #[must_use]
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
            model: model.into(),
            system_prompt: crate::config::MAGIC_MIRROR_PROMPT.to_string(),
            max_tokens: 150,
        }
    }

    /// Build from the `[llm]` section and API keys
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.llm.url.clone(),
            config.llm.model.clone(),
            config.api_keys.llm().cloned(),
        )
        .with_system_prompt(config.llm.system_prompt.clone())
        .with_max_tokens(config.llm.max_tokens)
    }

    /// Set the persona prompt used for chat replies
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Persona prompt for chat replies
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Full completions endpoint
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }

    /// Send one system + user exchange and return the assistant's text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response has no content
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("LLM API error {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Chat("LLM returned no content".to_string()))?;

        tracing::debug!(model = %self.model, chars = content.len(), "LLM completion");
        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Conversational replies in the configured persona
#[derive(Debug)]
pub struct LlmChat {
    llm: Arc<LlmClient>,
}

impl LlmChat {
    #[must_use]
    pub const fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ChatResponder for LlmChat {
    async fn reply(&self, text: &str) -> Result<String> {
        self.llm
            .complete(self.llm.system_prompt(), text)
            .await
            .map_err(|e| match e {
                Error::Chat(_) => e,
                other => Error::Chat(other.to_string()),
            })
    }
}

/// Asks the LLM to classify a transcript as one of the registered actions or chat
#[derive(Debug)]
pub struct LlmResolver {
    llm: Arc<LlmClient>,
    actions: Vec<String>,
}

impl LlmResolver {
    #[must_use]
    pub const fn new(llm: Arc<LlmClient>, actions: Vec<String>) -> Self {
        Self { llm, actions }
    }

    /// System prompt describing the JSON answer format
    #[must_use]
    pub fn classification_prompt(&self) -> String {
        let actions = if self.actions.is_empty() {
            "(none)".to_string()
        } else {
            self.actions.join(", ")
        };

        format!(
            "You classify requests to a voice assistant. \
             Available actions: {actions}. \
             Reply with a single JSON object and nothing else: \
             {{\"intent_type\": \"predefined_action\" or \"chat\", \
             \"action_name\": one of the available actions or null, \
             \"action_params\": an object of string parameters such as \
             \"location\" for weather or \"count\" for news}}. \
             Use \"chat\" for anything that is not one of the actions."
        )
    }
}

#[derive(Deserialize)]
struct Classification {
    intent_type: String,
    #[serde(default)]
    action_name: Option<String>,
    #[serde(default)]
    action_params: serde_json::Map<String, serde_json::Value>,
}

/// Parse the classifier's answer for `text`
///
/// The JSON object may be wrapped in prose or a code fence.
///
/// # Errors
///
/// Returns `Error::Intent` if no JSON object with an `intent_type` is found
pub fn parse_classification(answer: &str, text: &str) -> Result<IntentResult> {
    let (Some(start), Some(end)) = (answer.find('{'), answer.rfind('}')) else {
        return Err(Error::Intent(format!("no JSON in classifier answer: {answer}")));
    };
    if end < start {
        return Err(Error::Intent(format!("no JSON in classifier answer: {answer}")));
    }

    let parsed: Classification = serde_json::from_str(&answer[start..=end])
        .map_err(|e| Error::Intent(format!("invalid classifier JSON: {e}")))?;

    let action = parsed
        .action_name
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty());

    match (parsed.intent_type.as_str(), action) {
        ("predefined_action" | "action", Some(name)) => {
            let mut intent = IntentResult::action(name, ACTION_CONFIDENCE);
            for (key, value) in parsed.action_params {
                let value = match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                intent = intent.with_param(key, value);
            }
            Ok(intent)
        }
        _ => Ok(IntentResult::chat(text, CHAT_CONFIDENCE)),
    }
}

#[async_trait]
impl IntentResolver for LlmResolver {
    fn name(&self) -> &str {
        "llm"
    }

    async fn resolve(&self, text: &str) -> Result<IntentResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Intent("nothing to resolve".to_string()));
        }

        let answer = self
            .llm
            .complete(&self.classification_prompt(), text)
            .await
            .map_err(|e| Error::Intent(e.to_string()))?;

        parse_classification(&answer, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::IntentKind;

    #[test]
    fn test_endpoint() {
        let client = LlmClient::new("https://api.openai.com/v1/", "m", None);
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");

        let client = LlmClient::new("http://localhost:11434/v1/chat/completions", "m", None);
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_parse_action() {
        let answer = r#"Sure! ```json
{"intent_type": "predefined_action", "action_name": "News", "action_params": {"count": 5, "source": null}}
```"#;
        let intent = parse_classification(answer, "five news please").unwrap();
        assert_eq!(intent.kind, IntentKind::Action);
        assert_eq!(intent.payload, "news");
        assert_eq!(intent.param("count"), Some("5"));
        assert_eq!(intent.param("source"), None);
    }

    #[test]
    fn test_parse_chat_keeps_user_text() {
        let answer = r#"{"intent_type": "chat", "action_name": null}"#;
        let intent = parse_classification(answer, "who is the fairest").unwrap();
        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.payload, "who is the fairest");
    }

    #[test]
    fn test_parse_action_without_name_is_chat() {
        let answer = r#"{"intent_type": "predefined_action", "action_name": ""}"#;
        let intent = parse_classification(answer, "hmm").unwrap();
        assert_eq!(intent.kind, IntentKind::Chat);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_classification("I am a mirror", "x"),
            Err(Error::Intent(_))
        ));
        assert!(matches!(
            parse_classification("} oops {", "x"),
            Err(Error::Intent(_))
        ));
        assert!(matches!(
            parse_classification("{\"action_name\": \"news\"}", "x"),
            Err(Error::Intent(_))
        ));
    }

    #[test]
    fn test_prompt_lists_actions() {
        let llm = Arc::new(LlmClient::new("http://localhost", "m", None));
        let resolver = LlmResolver::new(llm, vec!["weather".to_string(), "news".to_string()]);
        assert!(resolver.classification_prompt().contains("weather, news"));
    }

    #[test]
    fn test_debug_hides_key() {
        let client = LlmClient::new("u", "m", Some(SecretString::from("sk-secret".to_string())));
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("has_key: true"));
    }
}
