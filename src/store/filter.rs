use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::models::{MediaType, WatchlistEntry};

/// Optional predicates over watchlist entries, combined with AND
///
/// An unset criterion imposes no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    pub media_type: Option<MediaType>,
    pub watched: Option<bool>,
    pub genre_id: Option<i64>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    pub fn watched(mut self, watched: bool) -> Self {
        self.watched = Some(watched);
        self
    }

    pub fn genre(mut self, genre_id: i64) -> Self {
        self.genre_id = Some(genre_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.media_type.is_none() && self.watched.is_none() && self.genre_id.is_none()
    }

    /// Whether `entry` passes every set criterion
    ///
    /// An entry whose genres are not in `genres` fails a set genre criterion.
    pub fn matches(&self, entry: &WatchlistEntry, genres: &GenreIndex) -> bool {
        if let Some(media_type) = self.media_type {
            if entry.media_type != media_type {
                return false;
            }
        }

        if let Some(watched) = self.watched {
            if entry.is_watched() != watched {
                return false;
            }
        }

        if let Some(genre_id) = self.genre_id {
            let has_genre = genres
                .get(entry.media_id, entry.media_type)
                .map(|ids| ids.contains(&genre_id))
                .unwrap_or(false);
            if !has_genre {
                return false;
            }
        }

        true
    }
}

/// Genre ids per media, fetched from the metadata system
#[derive(Debug, Clone, Default)]
pub struct GenreIndex {
    by_media: HashMap<(i64, MediaType), Vec<i64>>,
    revision: u64,
}

impl GenreIndex {
    pub fn insert(&mut self, media_id: i64, media_type: MediaType, genre_ids: Vec<i64>) {
        self.by_media.insert((media_id, media_type), genre_ids);
        self.revision += 1;
    }

    pub fn get(&self, media_id: i64, media_type: MediaType) -> Option<&[i64]> {
        self.by_media
            .get(&(media_id, media_type))
            .map(|ids| ids.as_slice())
    }

    pub fn contains(&self, media_id: i64, media_type: MediaType) -> bool {
        self.by_media.contains_key(&(media_id, media_type))
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Entries passing `criteria`, in canonical order
pub fn select(
    entries: &[WatchlistEntry],
    criteria: &FilterCriteria,
    genres: &GenreIndex,
) -> Vec<WatchlistEntry> {
    if criteria.is_empty() {
        return entries.to_vec();
    }

    entries
        .iter()
        .filter(|entry| criteria.matches(entry, genres))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewKey {
    entries_revision: u64,
    genres_revision: u64,
    criteria: FilterCriteria,
}

/// Memoized result of [`select`]
///
/// Recomputes only when the entries, the genre index or the criteria change.
#[derive(Debug, Default)]
pub struct FilteredView {
    key: Option<ViewKey>,
    cached: Arc<Vec<WatchlistEntry>>,
}

impl FilteredView {
    pub fn get(
        &mut self,
        entries: &[WatchlistEntry],
        entries_revision: u64,
        criteria: &FilterCriteria,
        genres: &GenreIndex,
    ) -> Arc<Vec<WatchlistEntry>> {
        let key = ViewKey {
            entries_revision,
            genres_revision: genres.revision(),
            criteria: *criteria,
        };

        if self.key.as_ref() != Some(&key) {
            self.cached = Arc::new(select(entries, criteria, genres));
            self.key = Some(key);
        }

        Arc::clone(&self.cached)
    }
}
