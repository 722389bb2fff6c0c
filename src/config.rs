use std::time::Duration;

use serde::Deserialize;

use crate::models::Session;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base URL of the watchlist and episode-watchlist resources
    #[serde(default = "default_watchlist_api_url")]
    pub watchlist_api_url: String,

    /// User the client session acts for; absent means anonymous
    #[serde(default)]
    pub watchlist_user_id: Option<String>,

    /// Timeout applied to every remote call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// TMDB API key used for genre lookups
    #[serde(default)]
    pub tmdb_api_key: Option<String>,

    /// TMDB API base URL
    #[serde(default = "default_tmdb_api_url")]
    pub tmdb_api_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_watchlist_api_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_tmdb_api_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watchlist_api_url: default_watchlist_api_url(),
            watchlist_user_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            tmdb_api_key: None,
            tmdb_api_url: default_tmdb_api_url(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Session for the configured user
    pub fn session(&self) -> Session {
        match &self.watchlist_user_id {
            Some(user_id) => Session::authenticated(user_id.clone()),
            None => Session::anonymous(),
        }
    }
}
