//! Headlines from an RSS feed

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::Action;
use crate::config::ActionsConfig;
use crate::nlu::IntentResult;
use crate::{Error, Result};

/// Spoken when the feed cannot be fetched
pub const NEWS_UNAVAILABLE: &str =
    "Sorry, I couldn't fetch the news at the moment. Please try again later.";

/// Most headlines read in one response
pub const MAX_HEADLINES: usize = 10;

static ITEM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<item\b.*?</item>").expect("valid regex"));

static TITLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<title>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</title>").expect("valid regex")
});

/// Item titles from an RSS document, in feed order, at most `count`
///
/// The channel's own title is skipped; only `<item>` titles are returned.
#[must_use]
pub fn extract_headlines(rss: &str, count: usize) -> Vec<String> {
    ITEM_REGEX
        .find_iter(rss)
        .filter_map(|item| {
            let caps = TITLE_REGEX.captures(item.as_str())?;
            let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
            let title = unescape(raw.trim());
            (!title.is_empty()).then_some(title)
        })
        .take(count)
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Reads the top headlines of a feed
pub struct NewsAction {
    client: reqwest::Client,
    feed_url: String,
    default_count: usize,
}

impl NewsAction {
    #[must_use]
    pub fn new(feed_url: impl Into<String>, default_count: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url: feed_url.into(),
            default_count: default_count.clamp(1, MAX_HEADLINES),
        }
    }

    #[must_use]
    pub fn from_config(config: &ActionsConfig) -> Self {
        Self::new(config.news_feed_url.clone(), config.news_count)
    }

    fn count(&self, intent: &IntentResult) -> usize {
        intent
            .param("count")
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(self.default_count)
            .clamp(1, MAX_HEADLINES)
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.feed_url)
            .header(reqwest::header::USER_AGENT, "mirror-voice")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::action("news", format!("feed returned {status}")));
        }

        Ok(response.text().await?)
    }
}

/// Spoken list of headlines
#[must_use]
pub fn spoken_headlines(headlines: &[String]) -> String {
    let intro = if headlines.len() == 1 {
        "Here is the top headline.".to_string()
    } else {
        format!("Here are the top {} headlines.", headlines.len())
    };

    headlines.iter().fold(intro, |mut text, headline| {
        text.push(' ');
        text.push_str(headline.trim_end_matches('.'));
        text.push('.');
        text
    })
}

#[async_trait]
impl Action for NewsAction {
    fn name(&self) -> &str {
        "news"
    }

    async fn execute(&self, intent: &IntentResult) -> Result<String> {
        let count = self.count(intent);

        let rss = match self.fetch().await {
            Ok(rss) => rss,
            Err(e) => {
                tracing::warn!(error = %e, url = %self.feed_url, "news feed request failed");
                return Err(Error::action("news", NEWS_UNAVAILABLE));
            }
        };

        let headlines = extract_headlines(&rss, count);
        if headlines.is_empty() {
            tracing::warn!(url = %self.feed_url, "news feed had no headlines");
            return Err(Error::action("news", NEWS_UNAVAILABLE));
        }

        tracing::info!(count = headlines.len(), "headlines fetched");
        Ok(spoken_headlines(&headlines))
    }
}
