use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Minutes between scheduler passes
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval: u64,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub news: NewsConfig,
}

fn default_dispatch_interval() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline shared by every category request of one aggregation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "https://newsapi.org/v2/everything".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

impl NewsConfig {
    /// `NEWS_API_KEY` from the environment takes precedence over the file.
    /// A missing key is left for the upstream API to reject.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("NEWS_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| self.api_key.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch_interval: default_dispatch_interval(),
            bind_addr: default_bind_addr(),
            news: NewsConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
