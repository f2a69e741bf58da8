//! Current weather from wttr.in

use std::time::Duration;

use async_trait::async_trait;
use mini_moka::sync::Cache;
use serde::Deserialize;

use super::Action;
use crate::config::ActionsConfig;
use crate::nlu::IntentResult;
use crate::{Error, Result};

const WTTR_BASE: &str = "https://wttr.in/";

/// Current conditions at one location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherReport {
    pub location: String,
    pub temperature_c: String,
    pub condition: String,
    pub humidity: String,
}

impl WeatherReport {
    /// Parse a wttr.in `format=j1` document
    ///
    /// # Errors
    ///
    /// Returns error if the document has no current conditions
    pub fn from_wttr(json: &str, requested: &str) -> Result<Self> {
        let doc: WttrResponse = serde_json::from_str(json)?;

        let current = doc
            .current_condition
            .into_iter()
            .next()
            .ok_or_else(|| Error::action("weather", "no current conditions in response"))?;

        let condition = current
            .weather_desc
            .into_iter()
            .next()
            .map(|d| d.value.trim().to_lowercase())
            .unwrap_or_default();

        let area = doc
            .nearest_area
            .into_iter()
            .next()
            .and_then(|a| a.area_name.into_iter().next())
            .map(|n| n.value);

        let location = if requested.trim().is_empty() {
            area.unwrap_or_default()
        } else {
            requested.trim().to_string()
        };

        Ok(Self {
            location,
            temperature_c: current.temp_c,
            condition,
            humidity: current.humidity,
        })
    }

    /// Sentence for TTS
    #[must_use]
    pub fn spoken(&self) -> String {
        format!(
            "It is {} degrees and {} in {}",
            self.temperature_c, self.condition, self.location
        )
    }
}

#[derive(Deserialize)]
struct WttrResponse {
    #[serde(default)]
    current_condition: Vec<CurrentCondition>,
    #[serde(default)]
    nearest_area: Vec<NearestArea>,
}

#[derive(Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(default)]
    humidity: String,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<TextValue>,
}

#[derive(Deserialize)]
struct NearestArea {
    #[serde(rename = "areaName", default)]
    area_name: Vec<TextValue>,
}

#[derive(Deserialize)]
struct TextValue {
    value: String,
}

/// Weather lookup with a per-location TTL cache
pub struct WeatherAction {
    client: reqwest::Client,
    default_location: String,
    cache: Cache<String, WeatherReport>,
}

impl WeatherAction {
    #[must_use]
    pub fn new(default_location: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_location: default_location.into(),
            cache: Cache::builder()
                .max_capacity(64)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ActionsConfig) -> Self {
        Self::new(config.weather_location.clone(), config.weather_cache_ttl)
    }

    /// Location to report: the spoken one, else the configured default
    fn location<'a>(&'a self, intent: &'a IntentResult) -> &'a str {
        intent
            .param("location")
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.default_location.as_str())
    }

    /// Seed the cache (used by tests and warm starts)
    pub fn insert_cached(&self, report: WeatherReport) {
        self.cache.insert(report.location.to_lowercase(), report);
    }

    async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        let mut url = reqwest::Url::parse(WTTR_BASE)
            .map_err(|e| Error::action("weather", e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| Error::action("weather", "invalid weather URL"))?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, "mirror-voice")
            .send()
            .await
            .map_err(|e| Error::action("weather", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::action("weather", format!("wttr.in returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::action("weather", e.to_string()))?;

        WeatherReport::from_wttr(&body, location).map_err(|e| match e {
            Error::Action { .. } => e,
            other => Error::action("weather", other.to_string()),
        })
    }
}

#[async_trait]
impl Action for WeatherAction {
    fn name(&self) -> &str {
        "weather"
    }

    async fn execute(&self, intent: &IntentResult) -> Result<String> {
        let location = self.location(intent);
        let key = location.to_lowercase();

        if let Some(report) = self.cache.get(&key) {
            tracing::debug!(location, "weather cache hit");
            return Ok(report.spoken());
        }

        let report = match self.fetch(location).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, location, "weather lookup failed");
                return Err(Error::action(
                    "weather",
                    format!("Sorry, I couldn't get the weather for {location} right now."),
                ));
            }
        };
        tracing::info!(
            location = %report.location,
            temperature = %report.temperature_c,
            condition = %report.condition,
            "weather fetched"
        );
        self.cache.insert(key, report.clone());
        Ok(report.spoken())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "current_condition": [{
            "temp_C": "18",
            "humidity": "52",
            "weatherDesc": [{"value": "Clear "}]
        }],
        "nearest_area": [{"areaName": [{"value": "Ithaca"}]}]
    }"#;

    #[test]
    fn test_parse_wttr() {
        let report = WeatherReport::from_wttr(SAMPLE, "").unwrap();
        assert_eq!(report.location, "Ithaca");
        assert_eq!(report.temperature_c, "18");
        assert_eq!(report.humidity, "52");
        assert_eq!(report.spoken(), "It is 18 degrees and clear in Ithaca");
    }

    #[test]
    fn test_requested_location_wins() {
        let report = WeatherReport::from_wttr(SAMPLE, "Paris").unwrap();
        assert_eq!(report.location, "Paris");
    }

    #[test]
    fn test_missing_conditions() {
        let err = WeatherReport::from_wttr(r#"{"current_condition": []}"#, "x").unwrap_err();
        assert!(matches!(err, Error::Action { .. }));
    }

    #[tokio::test]
    async fn test_cached_report_is_used() {
        let action = WeatherAction::new("Ithaca", Duration::from_secs(600));
        action.insert_cached(WeatherReport {
            location: "Paris".to_string(),
            temperature_c: "21".to_string(),
            condition: "sunny".to_string(),
            humidity: "40".to_string(),
        });

        let intent = IntentResult::action("weather", 0.9).with_param("location", "paris");
        assert_eq!(
            action.execute(&intent).await.unwrap(),
            "It is 21 degrees and sunny in Paris"
        );
    }

    #[test]
    fn test_default_location() {
        let action = WeatherAction::new("Ithaca", Duration::from_secs(1));
        let intent = IntentResult::action("weather", 0.9);
        assert_eq!(action.location(&intent), "Ithaca");
        let intent = intent.with_param("location", "  ");
        assert_eq!(action.location(&intent), "Ithaca");
    }
}
