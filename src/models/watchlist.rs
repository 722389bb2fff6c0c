use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Kind of media a watchlist entry points at in the metadata system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(AppError::InvalidInput(format!(
                "mediaType must be 'movie' or 'tv', got '{}'",
                other
            ))),
        }
    }
}

/// Watched status of a whole-media entry
///
/// `"not watched"` is accepted as a spelling of [`WatchStatus::Active`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    #[serde(alias = "not watched")]
    Active,
    Watched,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::Active => "active",
            WatchStatus::Watched => "watched",
        }
    }
}

impl Display for WatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" | "not watched" => Ok(WatchStatus::Active),
            "watched" => Ok(WatchStatus::Watched),
            other => Err(AppError::InvalidInput(format!(
                "status must be 'watched' or 'not watched', got '{}'",
                other
            ))),
        }
    }
}

/// A user's record of a movie or series on their watchlist
///
/// `(user_id, media_id, media_type)` is unique per persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    /// Surrogate key. Negative for provisional entries not yet confirmed.
    pub id: i64,
    pub media_id: i64,
    pub media_type: MediaType,
    pub user_id: String,
    pub status: WatchStatus,
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    /// Entry synthesized locally before the remote insert is confirmed
    pub fn provisional(id: i64, media_id: i64, media_type: MediaType, user_id: &str) -> Self {
        Self {
            id,
            media_id,
            media_type,
            user_id: user_id.to_string(),
            status: WatchStatus::Active,
            added_at: Utc::now(),
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id < 0
    }

    pub fn is_watched(&self) -> bool {
        self.status == WatchStatus::Watched
    }
}

/// Validates a movie or series identifier from the metadata system
pub fn validate_media_id(media_id: i64) -> Result<i64, AppError> {
    if media_id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "mediaId must be a positive integer, got {}",
            media_id
        )));
    }
    Ok(media_id)
}
