use serde::{Deserialize, Serialize};

pub mod episode;
pub mod session;
pub mod watchlist;

pub use episode::{EpisodeRef, EpisodeWatchlistEntry};
pub use session::Session;
pub use watchlist::{validate_media_id, MediaType, WatchStatus, WatchlistEntry};

// ============================================================================
// Watchlist Resource Wire Types
// ============================================================================

/// Response from GET /watchlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistListResponse {
    pub entries: Vec<WatchlistEntry>,
}

/// Response from the mutating watchlist endpoints
///
/// `entry` is only set by POST when a row was actually inserted; a duplicate
/// add is still `success: true` but carries no entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub entry: Option<WatchlistEntry>,
}

impl MutationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            entry: None,
        }
    }

    pub fn inserted(entry: WatchlistEntry) -> Self {
        Self {
            success: true,
            message: Some("Added to watchlist".to_string()),
            entry: Some(entry),
        }
    }
}

/// What a remote insert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A row was created; carries the server's copy
    Inserted(WatchlistEntry),
    /// The unique key already existed and the insert was a no-op
    AlreadyPresent,
}

// ============================================================================
// Episode Watchlist Resource Wire Types
// ============================================================================

/// Response from GET /episode-watchlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeListResponse {
    pub episodes: Vec<EpisodeWatchlistEntry>,
}

/// Response from POST/DELETE /episode-watchlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMutationResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// TMDB Metadata Types
// ============================================================================

/// The subset of TMDB `/movie/{id}` and `/tv/{id}` responses we read
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMediaDetails {
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbGenre {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}
