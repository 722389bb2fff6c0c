/// HTTP client for the watchlist and episode-watchlist resources
///
/// Endpoints:
/// - `/watchlist` (GET list, POST add, PUT status, DELETE remove)
/// - `/episode-watchlist` (GET list per series, POST mark, DELETE unmark)
///
/// The session user travels in the `x-user-id` header, which the fronting
/// auth provider sets in production.
use std::time::Duration;

use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    middleware::auth::USER_ID_HEADER,
    models::{
        AddOutcome, EpisodeListResponse, EpisodeMutationResponse, EpisodeRef,
        EpisodeWatchlistEntry, MediaType, MutationResponse, Session, WatchStatus, WatchlistEntry,
        WatchlistListResponse,
    },
    services::providers::{EpisodeWatchlistResource, WatchlistResource},
};

#[derive(Clone)]
pub struct WatchlistApiClient {
    http_client: HttpClient,
    api_url: String,
    session: Session,
}

impl WatchlistApiClient {
    pub fn new(api_url: impl Into<String>, session: Session, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        let api_url = api_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            api_url,
            session,
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            config.watchlist_api_url.clone(),
            config.session(),
            config.request_timeout(),
        )
    }

    /// Builds an authenticated request; fails before any I/O without a user
    fn request(&self, method: Method, path: &str) -> AppResult<RequestBuilder> {
        let user_id = self.session.user_id()?;
        let url = format!("{}{}", self.api_url, path);

        Ok(self
            .http_client
            .request(method, url)
            .header(USER_ID_HEADER, user_id))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> AppResult<T> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthenticated);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "Watchlist API returned status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    fn check_success(success: bool, message: Option<String>) -> AppResult<()> {
        if success {
            Ok(())
        } else {
            Err(AppError::Remote(
                message.unwrap_or_else(|| "Watchlist API reported failure".to_string()),
            ))
        }
    }

    fn episode_query(episode: &EpisodeRef) -> [(&'static str, String); 3] {
        [
            ("seriesId", episode.series_id.to_string()),
            ("season", episode.season_number.to_string()),
            ("episode", episode.episode_number.to_string()),
        ]
    }
}

#[async_trait::async_trait]
impl WatchlistResource for WatchlistApiClient {
    async fn list(&self) -> AppResult<Vec<WatchlistEntry>> {
        let response = self.request(Method::GET, "/watchlist")?.send().await?;
        let body: WatchlistListResponse = Self::read_json(response).await?;

        tracing::debug!(
            entries = body.entries.len(),
            provider = WatchlistResource::name(self),
            "Watchlist fetched"
        );

        Ok(body.entries)
    }

    async fn add(&self, media_id: i64, media_type: MediaType) -> AppResult<AddOutcome> {
        let response = self
            .request(Method::POST, "/watchlist")?
            .query(&[
                ("mediaId", media_id.to_string()),
                ("mediaType", media_type.to_string()),
                ("status", WatchStatus::Active.to_string()),
            ])
            .send()
            .await?;

        let body: MutationResponse = Self::read_json(response).await?;
        Self::check_success(body.success, body.message)?;

        Ok(match body.entry {
            Some(entry) => AddOutcome::Inserted(entry),
            None => AddOutcome::AlreadyPresent,
        })
    }

    async fn remove(&self, media_id: i64, media_type: Option<MediaType>) -> AppResult<()> {
        let mut query = vec![("mediaId", media_id.to_string())];
        if let Some(media_type) = media_type {
            query.push(("mediaType", media_type.to_string()));
        }

        let response = self
            .request(Method::DELETE, "/watchlist")?
            .query(&query)
            .send()
            .await?;

        let body: MutationResponse = Self::read_json(response).await?;
        Self::check_success(body.success, body.message)
    }

    async fn update_status(
        &self,
        media_id: i64,
        media_type: Option<MediaType>,
        status: WatchStatus,
    ) -> AppResult<()> {
        let mut query = vec![
            ("mediaId", media_id.to_string()),
            ("status", status.to_string()),
        ];
        if let Some(media_type) = media_type {
            query.push(("mediaType", media_type.to_string()));
        }

        let response = self
            .request(Method::PUT, "/watchlist")?
            .query(&query)
            .send()
            .await?;

        let body: MutationResponse = Self::read_json(response).await?;
        Self::check_success(body.success, body.message)
    }

    fn name(&self) -> &'static str {
        "watchlist_api"
    }
}

#[async_trait::async_trait]
impl EpisodeWatchlistResource for WatchlistApiClient {
    async fn list(&self, series_id: i64) -> AppResult<Vec<EpisodeWatchlistEntry>> {
        let response = self
            .request(Method::GET, "/episode-watchlist")?
            .query(&[("seriesId", series_id)])
            .send()
            .await?;

        let body: EpisodeListResponse = Self::read_json(response).await?;

        tracing::debug!(
            series_id,
            episodes = body.episodes.len(),
            provider = EpisodeWatchlistResource::name(self),
            "Episode markers fetched"
        );

        Ok(body.episodes)
    }

    async fn mark_watched(&self, episode: EpisodeRef) -> AppResult<()> {
        let response = self
            .request(Method::POST, "/episode-watchlist")?
            .query(&Self::episode_query(&episode))
            .send()
            .await?;

        let body: EpisodeMutationResponse = Self::read_json(response).await?;
        Self::check_success(body.success, body.message)
    }

    async fn mark_unwatched(&self, episode: EpisodeRef) -> AppResult<()> {
        let response = self
            .request(Method::DELETE, "/episode-watchlist")?
            .query(&Self::episode_query(&episode))
            .send()
            .await?;

        let body: EpisodeMutationResponse = Self::read_json(response).await?;
        Self::check_success(body.success, body.message)
    }

    fn name(&self) -> &'static str {
        "episode_watchlist_api"
    }
}
