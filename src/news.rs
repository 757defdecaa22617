use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::NewsConfig;

/// Upper bound on articles taken from each category's results
pub const ARTICLES_PER_CATEGORY: usize = 5;
pub const LOOKBACK_DAYS: i64 = 7;

pub const PLACEHOLDER_TITLE: &str = "Untitled";
pub const PLACEHOLDER_URL: &str = "#";
pub const PLACEHOLDER_DESCRIPTION: &str = "No description available";

/// Stand-in deadline when the configured timeout cannot be added to now
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// One entry of the upstream `articles` array. Fields that are absent, null
/// or not a string all read as `None`.
#[derive(Debug, Default, Deserialize)]
pub struct RawArticle {
    #[serde(default, deserialize_with = "string_or_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub description: Option<String>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

impl RawArticle {
    /// An entry that is not an object at all becomes an all-placeholder article.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    articles: Option<Vec<Value>>,
}

impl From<RawArticle> for Article {
    fn from(raw: RawArticle) -> Self {
        Self {
            title: or_placeholder(raw.title, PLACEHOLDER_TITLE),
            url: or_placeholder(raw.url, PLACEHOLDER_URL),
            description: or_placeholder(raw.description, PLACEHOLDER_DESCRIPTION),
        }
    }
}

fn or_placeholder(value: Option<String>, placeholder: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| placeholder.to_string())
}

/// Keep the first entries in upstream order and fill in missing fields.
pub fn normalize(raw: Vec<RawArticle>) -> Vec<Article> {
    raw.into_iter()
        .take(ARTICLES_PER_CATEGORY)
        .map(Article::from)
        .collect()
}

/// Lower date bound for the search, in the format the news API accepts.
pub fn cutoff(now: DateTime<Utc>) -> String {
    (now - chrono::Duration::days(LOOKBACK_DAYS))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned {0}")]
    Status(StatusCode),
    #[error("response has no articles field")]
    MissingResults,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("deadline of {0:?} elapsed")]
    TimedOut(Duration),
}

pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl NewsClient {
    pub fn new(config: &NewsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("NewsletterDigest/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.resolved_api_key(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Fetch recent articles for every category concurrently and concatenate
    /// them in input order. Never fails: a category that errors, returns a
    /// malformed body or misses the deadline contributes nothing.
    pub async fn aggregate(&self, categories: &[String]) -> Vec<Article> {
        if categories.is_empty() {
            return Vec::new();
        }

        let since = cutoff(Utc::now());
        let since = since.as_str();
        // One deadline per call, shared by every branch of this call only
        let deadline = Instant::now()
            .checked_add(self.timeout)
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        let fetches = categories.iter().map(move |category| async move {
            let result = timeout_at(deadline, self.fetch_category(category, since))
                .await
                .unwrap_or_else(|_| Err(FetchError::TimedOut(self.timeout)));

            match result {
                Ok(articles) => {
                    debug!("Category '{}' yielded {} articles", category, articles.len());
                    articles
                }
                Err(e) => {
                    warn!("Failed to fetch category '{}': {}", category, e);
                    Vec::new()
                }
            }
        });

        let articles: Vec<Article> = join_all(fetches).await.into_iter().flatten().collect();

        info!(
            "Aggregated {} articles from {} categories",
            articles.len(),
            categories.len()
        );
        articles
    }

    async fn fetch_category(
        &self,
        category: &str,
        since: &str,
    ) -> Result<Vec<Article>, FetchError> {
        let mut query = vec![("q", category), ("from", since), ("sortBy", "publishedAt")];
        if let Some(key) = &self.api_key {
            query.push(("apiKey", key.as_str()));
        }

        let response = self.client.get(&self.base_url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: SearchResponse = response.json().await?;
        let raw = body.articles.ok_or(FetchError::MissingResults)?;

        let entries = raw
            .into_iter()
            .take(ARTICLES_PER_CATEGORY)
            .map(RawArticle::from_value)
            .collect();

        Ok(normalize(entries))
    }
}
