use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    middleware::AuthUser,
    models::{
        validate_media_id, EpisodeListResponse, EpisodeMutationResponse, EpisodeRef, MediaType,
        MutationResponse, WatchStatus, WatchlistListResponse,
    },
};

use super::AppState;

// Query parameters arrive as strings so malformed values become a 400 with a
// message instead of the extractor's plain-text rejection.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistParams {
    pub media_id: Option<String>,
    pub media_type: Option<String>,
    pub status: Option<String>,
}

impl WatchlistParams {
    fn media_id(&self) -> AppResult<i64> {
        let raw = required(&self.media_id, "mediaId")?;
        let media_id = raw
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("mediaId is not an integer: {}", raw)))?;
        validate_media_id(media_id)
    }

    fn media_type(&self) -> AppResult<Option<MediaType>> {
        self.media_type.as_deref().map(str::parse::<MediaType>).transpose()
    }

    fn status(&self) -> AppResult<Option<WatchStatus>> {
        self.status.as_deref().map(str::parse::<WatchStatus>).transpose()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeParams {
    pub series_id: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
}

impl EpisodeParams {
    fn series_id(&self) -> AppResult<i64> {
        let series_id = parse_int(required(&self.series_id, "seriesId")?, "seriesId")?;
        if series_id <= 0 {
            return Err(AppError::InvalidInput(format!(
                "seriesId must be a positive integer, got {}",
                series_id
            )));
        }
        Ok(series_id)
    }

    fn episode(&self) -> AppResult<EpisodeRef> {
        let series_id = self.series_id()?;
        let season = parse_int(required(&self.season, "season")?, "season")?;
        let episode = parse_int(required(&self.episode, "episode")?, "episode")?;
        EpisodeRef::new(series_id, season, episode).validate()
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("No {} provided", name)))
}

fn parse_int<T: std::str::FromStr>(raw: &str, name: &str) -> AppResult<T> {
    raw.parse()
        .map_err(|_| AppError::InvalidInput(format!("{} is not an integer: {}", name, raw)))
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

pub async fn list_watchlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Json<WatchlistListResponse> {
    let entries = state.list_watchlist(&user_id).await;
    Json(WatchlistListResponse { entries })
}

/// Inserts an entry; a duplicate is a successful no-op without `entry`
///
/// Without `status` the row is stored as watched.
pub async fn add_to_watchlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<WatchlistParams>,
) -> AppResult<Json<MutationResponse>> {
    let media_id = params.media_id()?;
    let media_type = params
        .media_type()?
        .ok_or_else(|| AppError::InvalidInput("No mediaType provided".to_string()))?;
    let status = params.status()?.unwrap_or(WatchStatus::Watched);

    let response = match state
        .insert_watchlist(&user_id, media_id, media_type, status)
        .await
    {
        Some(entry) => {
            tracing::info!(media_id, media_type = %media_type, entry_id = entry.id, "Watchlist entry added");
            MutationResponse::inserted(entry)
        }
        None => {
            tracing::debug!(media_id, media_type = %media_type, "Watchlist entry already present");
            MutationResponse::ok("Already in watchlist")
        }
    };

    Ok(Json(response))
}

pub async fn update_watchlist_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<WatchlistParams>,
) -> AppResult<Json<MutationResponse>> {
    let media_id = params.media_id()?;
    let media_type = params.media_type()?;
    let status = params
        .status()?
        .ok_or_else(|| AppError::InvalidInput("No status provided".to_string()))?;

    let updated = state
        .update_watchlist_status(&user_id, media_id, media_type, status)
        .await;
    if updated == 0 {
        return Err(AppError::NotFound(format!(
            "No watchlist entry for mediaId {}",
            media_id
        )));
    }

    tracing::info!(media_id, status = %status, "Watchlist status updated");
    Ok(Json(MutationResponse::ok("Status updated")))
}

/// Deletes the caller's entry for `mediaId`
///
/// With `mediaType` only that row goes. Without it every row for `mediaId`
/// is removed, movie and tv alike; the client only omits it for entries it
/// no longer holds locally. Deleting an absent entry still succeeds.
pub async fn remove_from_watchlist(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<WatchlistParams>,
) -> AppResult<Json<MutationResponse>> {
    let media_id = params.media_id()?;
    let media_type = params.media_type()?;

    let removed = state.delete_watchlist(&user_id, media_id, media_type).await;
    tracing::info!(media_id, removed, "Watchlist entry removed");

    Ok(Json(MutationResponse::ok("Removed from watchlist")))
}

pub async fn list_episodes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<EpisodeParams>,
) -> AppResult<Json<EpisodeListResponse>> {
    let series_id = params.series_id()?;
    let episodes = state.list_episodes(&user_id, series_id).await;
    Ok(Json(EpisodeListResponse { episodes }))
}

pub async fn mark_episode_watched(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<EpisodeParams>,
) -> AppResult<Json<EpisodeMutationResponse>> {
    let episode = params.episode()?;
    let inserted = state.insert_episode(&user_id, episode).await;
    tracing::info!(%episode, inserted, "Episode marked watched");

    let message = if inserted { "Marked watched" } else { "Already watched" };
    Ok(Json(EpisodeMutationResponse {
        success: true,
        message: Some(message.to_string()),
    }))
}

pub async fn mark_episode_unwatched(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<EpisodeParams>,
) -> AppResult<Json<EpisodeMutationResponse>> {
    let episode = params.episode()?;
    let removed = state.delete_episode(&user_id, episode).await;
    tracing::info!(%episode, removed, "Episode marked unwatched");

    Ok(Json(EpisodeMutationResponse {
        success: true,
        message: Some("Marked unwatched".to_string()),
    }))
}
