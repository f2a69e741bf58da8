//! Predefined actions
//!
//! An action turns an action intent into response text. Actions are looked
//! up by name in an [`ActionRegistry`]; the session machine speaks the
//! returned text.

mod news;
mod weather;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::config::Config;
use crate::nlu::IntentResult;

pub use news::{MAX_HEADLINES, NEWS_UNAVAILABLE, NewsAction, extract_headlines, spoken_headlines};
pub use weather::{WeatherAction, WeatherReport};

/// A named operation producing spoken response text
#[async_trait]
pub trait Action: Send + Sync {
    /// Name the intent payload must match
    fn name(&self) -> &str;

    /// Run the action for `intent`
    ///
    /// # Errors
    ///
    /// Returns `Error::Action` if the action cannot produce a response
    async fn execute(&self, intent: &IntentResult) -> Result<String>;
}

/// Actions available to the session, by name
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in actions configured from `[actions]`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WeatherAction::from_config(&config.actions)));
        registry.register(Arc::new(NewsAction::from_config(&config.actions)));
        registry
    }

    /// Register an action, replacing any previous one with the same name
    pub fn register(&mut self, action: Arc<dyn Action>) {
        let name = action.name().to_lowercase();
        tracing::debug!(action = %name, "action registered");
        self.actions.insert(name, action);
    }

    /// Look up an action by name (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(&name.trim().to_lowercase()).cloned()
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn execute(&self, intent: &IntentResult) -> Result<String> {
            Ok(intent.param("text").unwrap_or_default().to_string())
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::from_config(&Config::default());
        assert_eq!(registry.names(), vec!["news", "weather"]);
        assert!(registry.get("weather").is_some());
        assert!(registry.get("music").is_none());
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(Echo));

        let action = registry.get(" ECHO ").unwrap();
        let intent = IntentResult::action("echo", 1.0).with_param("text", "hi");
        assert_eq!(action.execute(&intent).await.unwrap(), "hi");
        assert_eq!(registry.len(), 1);
    }
}
