use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{EpisodeRef, EpisodeWatchlistEntry, MediaType, WatchStatus, WatchlistEntry};

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    pub inner: Arc<RwLock<AppStateInner>>,
}

/// In-memory watchlist tables
///
/// Unique keys: `(user, media_id, media_type)` for whole media and
/// `(user, series_id, season, episode)` for episode markers.
#[derive(Default)]
pub struct AppStateInner {
    watchlist: Vec<WatchlistEntry>,
    episodes: Vec<EpisodeWatchlistEntry>,
    last_watchlist_id: i64,
    last_episode_id: i64,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of `user_id`, newest first
    pub async fn list_watchlist(&self, user_id: &str) -> Vec<WatchlistEntry> {
        let inner = self.inner.read().await;
        let mut entries: Vec<WatchlistEntry> = inner
            .watchlist
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        entries
    }

    /// Inserts a row; `None` when the unique key already exists
    pub async fn insert_watchlist(
        &self,
        user_id: &str,
        media_id: i64,
        media_type: MediaType,
        status: WatchStatus,
    ) -> Option<WatchlistEntry> {
        let mut inner = self.inner.write().await;

        let exists = inner.watchlist.iter().any(|e| {
            e.user_id == user_id && e.media_id == media_id && e.media_type == media_type
        });
        if exists {
            return None;
        }

        inner.last_watchlist_id += 1;
        let entry = WatchlistEntry {
            id: inner.last_watchlist_id,
            media_id,
            media_type,
            user_id: user_id.to_string(),
            status,
            added_at: Utc::now(),
        };
        inner.watchlist.push(entry.clone());
        Some(entry)
    }

    /// Deletes matching rows and returns how many were removed
    ///
    /// Without `media_type` every row for `media_id` goes.
    pub async fn delete_watchlist(
        &self,
        user_id: &str,
        media_id: i64,
        media_type: Option<MediaType>,
    ) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.watchlist.len();
        inner
            .watchlist
            .retain(|e| !(e.user_id == user_id && matches_media(e, media_id, media_type)));
        before - inner.watchlist.len()
    }

    /// Sets the status of matching rows and returns how many were updated
    pub async fn update_watchlist_status(
        &self,
        user_id: &str,
        media_id: i64,
        media_type: Option<MediaType>,
        status: WatchStatus,
    ) -> usize {
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        for entry in inner
            .watchlist
            .iter_mut()
            .filter(|e| e.user_id == user_id && matches_media(e, media_id, media_type))
        {
            entry.status = status;
            updated += 1;
        }
        updated
    }

    /// Watched markers of `user_id` for one series, newest first
    pub async fn list_episodes(&self, user_id: &str, series_id: i64) -> Vec<EpisodeWatchlistEntry> {
        let inner = self.inner.read().await;
        let mut episodes: Vec<EpisodeWatchlistEntry> = inner
            .episodes
            .iter()
            .filter(|e| e.user_id == user_id && e.series_id == series_id)
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        episodes
    }

    /// Returns `false` when the marker already existed
    pub async fn insert_episode(&self, user_id: &str, episode: EpisodeRef) -> bool {
        let mut inner = self.inner.write().await;

        if inner
            .episodes
            .iter()
            .any(|e| e.user_id == user_id && e.episode() == episode)
        {
            return false;
        }

        inner.last_episode_id += 1;
        let marker = EpisodeWatchlistEntry {
            id: inner.last_episode_id,
            series_id: episode.series_id,
            season_number: episode.season_number,
            episode_number: episode.episode_number,
            user_id: user_id.to_string(),
            added_at: Utc::now(),
        };
        inner.episodes.push(marker);
        true
    }

    /// Returns `false` when there was no marker to delete
    pub async fn delete_episode(&self, user_id: &str, episode: EpisodeRef) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.episodes.len();
        inner
            .episodes
            .retain(|e| !(e.user_id == user_id && e.episode() == episode));
        inner.episodes.len() != before
    }
}

fn matches_media(entry: &WatchlistEntry, media_id: i64, media_type: Option<MediaType>) -> bool {
    entry.media_id == media_id && media_type.map_or(true, |t| entry.media_type == t)
}
