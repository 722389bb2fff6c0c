//! Client-side mirror of a user's watched episodes.
//!
//! Watched state is membership in a set of [`EpisodeRef`]s. Toggles flip
//! membership immediately and are confirmed by a background worker; a failed
//! toggle restores the last membership the server confirmed for that episode.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, RwLock},
    time::Duration,
};

use crate::{
    error::{AppError, AppResult},
    models::{EpisodeRef, Session},
    services::providers::EpisodeWatchlistResource,
    store::{
        mutation::{self, MutationOutcome, MutationPhase, MutationTracker, PendingMutation},
        worker::{MutationHandler, WorkerHandle},
        DEFAULT_REQUEST_TIMEOUT,
    },
};

#[derive(Debug)]
struct Toggle {
    episode: EpisodeRef,
    /// Membership the toggle produced locally
    watched: bool,
}

#[derive(Default)]
struct EpisodeState {
    watched: HashSet<EpisodeRef>,
    loaded_series: HashSet<i64>,
    /// Server-confirmed membership of episodes with toggles in flight
    confirmed: HashMap<EpisodeRef, bool>,
    mutations: MutationTracker<EpisodeRef>,
    load_requested: HashMap<i64, u64>,
    load_applied: HashMap<i64, u64>,
    /// Count of toggles ever submitted
    toggle_seq: u64,
    /// Sequence number of the latest toggle per episode
    last_toggled: HashMap<EpisodeRef, u64>,
}

impl EpisodeState {
    fn set_membership(&mut self, episode: EpisodeRef, watched: bool) {
        if watched {
            self.watched.insert(episode);
        } else {
            self.watched.remove(&episode);
        }
    }
}

struct Shared {
    remote: Arc<dyn EpisodeWatchlistResource>,
    session: Session,
    request_timeout: Duration,
    state: RwLock<EpisodeState>,
}

impl Shared {
    async fn call<T>(&self, request: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| AppError::Timeout(self.request_timeout))?
    }
}

#[async_trait::async_trait]
impl MutationHandler for Shared {
    type Mutation = Toggle;

    async fn confirm(&self, toggle: Toggle, generation: u64) -> MutationOutcome {
        let Toggle { episode, watched } = toggle;

        let result = if watched {
            self.call(self.remote.mark_watched(episode)).await
        } else {
            self.call(self.remote.mark_unwatched(episode)).await
        };

        let mut state = mutation::write(&self.state);
        let latest = state.mutations.is_latest(&episode, generation);

        let outcome = match result {
            Ok(()) => {
                state.confirmed.insert(episode, watched);
                if latest {
                    tracing::debug!(%episode, watched, "Episode toggle confirmed");
                    MutationOutcome::Confirmed
                } else {
                    MutationOutcome::Superseded
                }
            }
            Err(e) if latest => {
                let restored = state.confirmed.get(&episode).copied().unwrap_or(!watched);
                state.set_membership(episode, restored);
                tracing::warn!(
                    error = %e,
                    %episode,
                    restored,
                    provider = self.remote.name(),
                    "Episode toggle failed, reverting"
                );
                MutationOutcome::Reverted {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    %episode,
                    generation,
                    provider = self.remote.name(),
                    "Superseded episode toggle failed"
                );
                MutationOutcome::Superseded
            }
        };

        state.mutations.finish(&episode);
        if !state.mutations.is_in_flight(&episode) {
            state.confirmed.remove(&episode);
        }

        outcome
    }

    fn name(&self) -> &'static str {
        "episode_watchlist"
    }
}

/// Shared client-side store of watched episodes, across series
///
/// Cheap to clone; clones share state and the background worker.
#[derive(Clone)]
pub struct EpisodeWatchlistStore {
    shared: Arc<Shared>,
    worker: WorkerHandle<Toggle>,
}

impl EpisodeWatchlistStore {
    /// Must be called from within a Tokio runtime.
    pub fn new(remote: Arc<dyn EpisodeWatchlistResource>, session: Session) -> Self {
        Self::with_timeout(remote, session, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        remote: Arc<dyn EpisodeWatchlistResource>,
        session: Session,
        request_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            remote,
            session,
            request_timeout,
            state: RwLock::new(EpisodeState::default()),
        });
        let worker = WorkerHandle::spawn(Arc::clone(&shared));

        Self { shared, worker }
    }

    /// Replaces the watched markers of `series_id` with the remote set
    ///
    /// Episodes toggled after the fetch started, or still in flight, keep
    /// their local membership. On failure prior state is left untouched.
    pub async fn load(&self, series_id: i64) -> AppResult<()> {
        self.shared.session.user_id()?;
        if series_id <= 0 {
            return Err(AppError::InvalidInput(format!(
                "seriesId must be a positive integer, got {}",
                series_id
            )));
        }

        let (ticket, since) = {
            let mut state = mutation::write(&self.shared.state);
            let ticket = state.load_requested.entry(series_id).or_insert(0);
            *ticket += 1;
            (*ticket, state.toggle_seq)
        };

        let markers = self
            .shared
            .call(self.shared.remote.list(series_id))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, series_id, "Failed to load episode watchlist");
                e
            })?;

        let mut state = mutation::write(&self.shared.state);
        let applied = state.load_applied.get(&series_id).copied().unwrap_or(0);
        if ticket <= applied {
            tracing::debug!(series_id, ticket, "Discarding stale episode watchlist load");
            return Ok(());
        }
        state.load_applied.insert(series_id, ticket);

        let EpisodeState {
            watched,
            mutations,
            last_toggled,
            ..
        } = &mut *state;

        // the fetched list predates these episodes' local state
        let keep_local = |e: &EpisodeRef| {
            mutations.is_in_flight(e) || last_toggled.get(e).is_some_and(|seq| *seq > since)
        };

        watched.retain(|e| e.series_id != series_id || keep_local(e));
        let fetched: Vec<EpisodeRef> = markers
            .iter()
            .map(|m| m.episode())
            .filter(|e| e.series_id == series_id && !keep_local(e))
            .collect();
        let count = fetched.len();
        watched.extend(fetched);

        state.loaded_series.insert(series_id);

        tracing::info!(series_id, watched = count, "Episode watchlist loaded");
        Ok(())
    }

    /// Flips the watched state of `episode`
    ///
    /// Adds the marker when absent and removes it when present, then queues
    /// the matching remote call.
    pub fn toggle(&self, episode: EpisodeRef) -> AppResult<PendingMutation> {
        self.shared.session.user_id()?;
        let episode = episode.validate()?;

        if self.worker.is_closed() {
            return Err(AppError::Internal(
                "episode watchlist store has shut down".to_string(),
            ));
        }

        let mut state = mutation::write(&self.shared.state);
        let was_watched = state.watched.contains(&episode);

        if !state.mutations.is_in_flight(&episode) {
            state.confirmed.insert(episode, was_watched);
        }
        state.set_membership(episode, !was_watched);
        let generation = state.mutations.begin(episode);
        state.toggle_seq += 1;
        let seq = state.toggle_seq;
        state.last_toggled.insert(episode, seq);

        tracing::debug!(%episode, watched = !was_watched, generation, "Episode toggle queued");

        let toggle = Toggle {
            episode,
            watched: !was_watched,
        };
        self.worker.submit(toggle, generation).map_err(|e| {
            state.set_membership(episode, was_watched);
            state.mutations.finish(&episode);
            e
        })
    }

    pub fn is_watched(&self, episode: EpisodeRef) -> bool {
        mutation::read(&self.shared.state).watched.contains(&episode)
    }

    /// Watched episodes of `series_id`, by season then episode
    pub fn watched_episodes(&self, series_id: i64) -> Vec<EpisodeRef> {
        let mut episodes: Vec<EpisodeRef> = mutation::read(&self.shared.state)
            .watched
            .iter()
            .filter(|e| e.series_id == series_id)
            .copied()
            .collect();
        episodes.sort();
        episodes
    }

    pub fn watched_in_season(&self, series_id: i64, season_number: i32) -> usize {
        mutation::read(&self.shared.state)
            .watched
            .iter()
            .filter(|e| e.series_id == series_id && e.season_number == season_number)
            .count()
    }

    /// Whether `load` has completed for `series_id` at least once
    pub fn is_loaded(&self, series_id: i64) -> bool {
        mutation::read(&self.shared.state)
            .loaded_series
            .contains(&series_id)
    }

    pub fn mutation_phase(&self, episode: EpisodeRef) -> MutationPhase {
        mutation::read(&self.shared.state).mutations.phase(&episode)
    }

    /// Waits until every toggle submitted so far is confirmed or reverted
    pub async fn settled(&self) {
        self.worker.barrier().await;
    }

    /// Drains queued toggles and stops the worker
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}
