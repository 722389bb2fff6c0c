//! TMDB metadata provider
//!
//! Only genre ids are read; they back the genre criterion of the watchlist
//! filter and are never stored on entries.

use reqwest::Client as HttpClient;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{MediaType, TmdbMediaDetails},
    services::providers::MetadataProvider,
};

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
}

impl TmdbProvider {
    pub fn new(api_key: String, api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns `None` when no API key is configured
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .tmdb_api_key
            .clone()
            .map(|key| Self::new(key, config.tmdb_api_url.clone()))
    }

    fn details_url(&self, media_id: i64, media_type: MediaType) -> String {
        format!("{}/{}/{}", self.api_url, media_type.as_str(), media_id)
    }

    fn parse_genre_ids(body: &str) -> AppResult<Vec<i64>> {
        let details: TmdbMediaDetails = serde_json::from_str(body).map_err(|e| {
            AppError::Remote(format!("Failed to parse TMDB response: {}", e))
        })?;
        Ok(details.genres.into_iter().map(|g| g.id).collect())
    }
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbProvider {
    async fn genre_ids(&self, media_id: i64, media_type: MediaType) -> AppResult<Vec<i64>> {
        let response = self
            .http_client
            .get(self.details_url(media_id, media_type))
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "TMDB API returned status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let genre_ids = Self::parse_genre_ids(&body)?;

        tracing::debug!(
            media_id,
            media_type = %media_type,
            genres = genre_ids.len(),
            provider = self.name(),
            "Genres fetched"
        );

        Ok(genre_ids)
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
