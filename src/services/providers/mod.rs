/// Remote collaborator abstractions
///
/// The stores only talk to the watchlist resources and the metadata system
/// through these traits, so the transport can be swapped (HTTP in
/// production, mocks in tests).
use crate::{
    error::AppResult,
    models::{AddOutcome, EpisodeRef, EpisodeWatchlistEntry, MediaType, WatchStatus, WatchlistEntry},
};

pub mod tmdb;
pub mod watchlist_api;

/// Whole-media watchlist resource, scoped to the authenticated caller
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WatchlistResource: Send + Sync {
    /// Fetch every entry of the caller, newest first
    ///
    /// A user with no entries gets an empty list, not an error.
    async fn list(&self) -> AppResult<Vec<WatchlistEntry>>;

    /// Insert unless `(user, media_id, media_type)` already exists
    async fn add(&self, media_id: i64, media_type: MediaType) -> AppResult<AddOutcome>;

    /// Delete the caller's entry for `media_id`
    ///
    /// With `media_type` set only that row is removed; movie and tv ids
    /// overlap in the metadata system.
    async fn remove(&self, media_id: i64, media_type: Option<MediaType>) -> AppResult<()>;

    async fn update_status(
        &self,
        media_id: i64,
        media_type: Option<MediaType>,
        status: WatchStatus,
    ) -> AppResult<()>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Per-episode watched markers, scoped to the authenticated caller
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EpisodeWatchlistResource: Send + Sync {
    async fn list(&self, series_id: i64) -> AppResult<Vec<EpisodeWatchlistEntry>>;

    /// Idempotent insert of a watched marker
    async fn mark_watched(&self, episode: EpisodeRef) -> AppResult<()>;

    async fn mark_unwatched(&self, episode: EpisodeRef) -> AppResult<()>;

    fn name(&self) -> &'static str;
}

/// Metadata lookups the stores need that are not stored on entries
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn genre_ids(&self, media_id: i64, media_type: MediaType) -> AppResult<Vec<i64>>;

    fn name(&self) -> &'static str;
}
