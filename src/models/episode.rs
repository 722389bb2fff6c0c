use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Identifies one episode of a series
///
/// Orders by series, then season, then episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRef {
    pub series_id: i64,
    pub season_number: i32,
    pub episode_number: i32,
}

impl EpisodeRef {
    pub fn new(series_id: i64, season_number: i32, episode_number: i32) -> Self {
        Self {
            series_id,
            season_number,
            episode_number,
        }
    }

    /// Season 0 holds specials, so only negative seasons are rejected.
    pub fn validate(self) -> AppResult<Self> {
        if self.series_id <= 0 {
            return Err(AppError::InvalidInput(format!(
                "seriesId must be a positive integer, got {}",
                self.series_id
            )));
        }
        if self.season_number < 0 {
            return Err(AppError::InvalidInput(format!(
                "season must not be negative, got {}",
                self.season_number
            )));
        }
        if self.episode_number < 1 {
            return Err(AppError::InvalidInput(format!(
                "episode must be at least 1, got {}",
                self.episode_number
            )));
        }
        Ok(self)
    }
}

impl Display for EpisodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:S{:02}E{:02}",
            self.series_id, self.season_number, self.episode_number
        )
    }
}

/// Persisted marker that a user has watched an episode
///
/// Absence of a marker means unwatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeWatchlistEntry {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i32,
    pub episode_number: i32,
    pub user_id: String,
    pub added_at: DateTime<Utc>,
}

impl EpisodeWatchlistEntry {
    pub fn episode(&self) -> EpisodeRef {
        EpisodeRef::new(self.series_id, self.season_number, self.episode_number)
    }
}
