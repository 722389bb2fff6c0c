//! Client-side mirror of a user's whole-media watchlist.
//!
//! Mutations are applied to local state immediately and confirmed by a
//! background worker. Any failed or ambiguous confirmation makes the store
//! resynchronize from the remote once no other mutation is queued; the server
//! list is the ground truth because provisional entries carry ids the server
//! never assigned.

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use crate::{
    error::{AppError, AppResult},
    models::{validate_media_id, AddOutcome, MediaType, Session, WatchStatus, WatchlistEntry},
    services::providers::{MetadataProvider, WatchlistResource},
    store::{
        filter::{FilterCriteria, FilteredView, GenreIndex},
        mutation::{self, MutationOutcome, MutationPhase, MutationTracker, PendingMutation},
        worker::{MutationHandler, WorkerHandle},
        DEFAULT_REQUEST_TIMEOUT,
    },
};

/// Fetch attempts before a load gives up waiting for a quiet moment
const MAX_LOAD_ATTEMPTS: usize = 3;

#[derive(Debug)]
enum Mutation {
    Add {
        media_id: i64,
        media_type: MediaType,
    },
    Remove {
        media_id: i64,
        media_type: Option<MediaType>,
    },
    UpdateStatus {
        media_id: i64,
        media_type: Option<MediaType>,
        status: WatchStatus,
    },
}

impl Mutation {
    fn media_id(&self) -> i64 {
        match self {
            Mutation::Add { media_id, .. }
            | Mutation::Remove { media_id, .. }
            | Mutation::UpdateStatus { media_id, .. } => *media_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "add",
            Mutation::Remove { .. } => "remove",
            Mutation::UpdateStatus { .. } => "update_status",
        }
    }
}

#[derive(Default)]
struct WatchlistState {
    entries: Vec<WatchlistEntry>,
    /// Bumped on every change to `entries`
    revision: u64,
    filter: FilterCriteria,
    genres: GenreIndex,
    mutations: MutationTracker<i64>,
    last_provisional_id: i64,
    needs_resync: bool,
    /// Count of mutations ever submitted
    submitted: u64,
    load_requested: u64,
    load_applied: u64,
}

impl WatchlistState {
    fn next_provisional_id(&mut self) -> i64 {
        self.last_provisional_id -= 1;
        self.last_provisional_id
    }

    fn position(&self, media_id: i64) -> Option<usize> {
        self.entries.iter().position(|e| e.media_id == media_id)
    }

    fn replace_entries(&mut self, entries: Vec<WatchlistEntry>) {
        self.entries = entries;
        self.revision += 1;
        self.needs_resync = false;
        self.mutations.settle_reconciled();
    }
}

struct Shared {
    remote: Arc<dyn WatchlistResource>,
    session: Session,
    request_timeout: Duration,
    state: RwLock<WatchlistState>,
    view: Mutex<FilteredView>,
    /// Mutations submitted but not yet processed by the worker
    queued: AtomicUsize,
}

impl Shared {
    async fn call<T>(&self, request: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| AppError::Timeout(self.request_timeout))?
    }

    /// Replaces local entries with the remote list
    ///
    /// A list fetched while mutations were submitted is not applied over
    /// their optimistic state: if mutations are still queued the resync is
    /// left to the worker, otherwise the fetch is retried. A list that is
    /// still stale after the last attempt is dropped with an error.
    async fn load(&self) -> AppResult<()> {
        self.session.user_id()?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let (ticket, epoch) = {
                let mut state = mutation::write(&self.state);
                state.load_requested += 1;
                (state.load_requested, state.submitted)
            };

            let entries = self.call(self.remote.list()).await.map_err(|e| {
                tracing::warn!(
                    error = %e,
                    attempt,
                    provider = self.remote.name(),
                    "Failed to load watchlist"
                );
                e
            })?;

            let mut state = mutation::write(&self.state);

            if ticket <= state.load_applied {
                tracing::debug!(ticket, "Discarding stale watchlist load");
                return Ok(());
            }

            if self.queued.load(Ordering::SeqCst) > 0 {
                tracing::debug!("Mutations queued, deferring watchlist load to the worker");
                state.needs_resync = true;
                return Ok(());
            }

            if state.submitted != epoch {
                if attempt < MAX_LOAD_ATTEMPTS {
                    tracing::debug!(attempt, "Watchlist changed during load, fetching again");
                    continue;
                }

                tracing::warn!(attempt, "Watchlist kept changing during load, keeping local state");
                state.needs_resync = true;
                return Err(AppError::Remote(format!(
                    "watchlist changed during each of {} load attempts",
                    MAX_LOAD_ATTEMPTS
                )));
            }

            state.load_applied = ticket;
            state.replace_entries(entries);

            tracing::info!(entries = state.entries.len(), "Watchlist loaded");
            return Ok(());
        }
    }

    /// Adopts the server's id, owner and timestamp for an inserted entry
    ///
    /// Status is left alone so a later optimistic status change survives. A
    /// superseded insert only claims an entry that is still provisional.
    fn apply_server_echo(state: &mut WatchlistState, server_entry: WatchlistEntry, latest: bool) {
        let target = state.entries.iter_mut().find(|e| {
            e.media_id == server_entry.media_id
                && e.media_type == server_entry.media_type
                && (latest || e.is_provisional())
        });

        if let Some(entry) = target {
            entry.id = server_entry.id;
            entry.user_id = server_entry.user_id;
            entry.added_at = server_entry.added_at;
            state.revision += 1;
        }
    }
}

#[async_trait::async_trait]
impl MutationHandler for Shared {
    type Mutation = Mutation;

    async fn confirm(&self, mutation: Mutation, generation: u64) -> MutationOutcome {
        let media_id = mutation.media_id();
        let kind = mutation.kind();

        let result = match mutation {
            Mutation::Add {
                media_id,
                media_type,
            } => self.call(self.remote.add(media_id, media_type)).await.map(Some),
            Mutation::Remove {
                media_id,
                media_type,
            } => self
                .call(self.remote.remove(media_id, media_type))
                .await
                .map(|_| None),
            Mutation::UpdateStatus {
                media_id,
                media_type,
                status,
            } => self
                .call(self.remote.update_status(media_id, media_type, status))
                .await
                .map(|_| None),
        };

        let mut state = mutation::write(&self.state);
        let latest = state.mutations.is_latest(&media_id, generation);

        let outcome = match result {
            Ok(Some(AddOutcome::Inserted(server_entry))) => {
                Self::apply_server_echo(&mut state, server_entry, latest);
                if latest {
                    tracing::debug!(media_id, kind, "Watchlist mutation confirmed");
                    MutationOutcome::Confirmed
                } else {
                    tracing::debug!(media_id, kind, generation, "Watchlist mutation superseded");
                    MutationOutcome::Superseded
                }
            }
            Ok(Some(AddOutcome::AlreadyPresent)) => {
                tracing::info!(media_id, "Entry already on remote watchlist, resyncing");
                state.needs_resync = true;
                state.mutations.mark_reconciling(&media_id);
                MutationOutcome::AlreadyPresent
            }
            Ok(_) if latest => {
                tracing::debug!(media_id, kind, "Watchlist mutation confirmed");
                MutationOutcome::Confirmed
            }
            Ok(_) => {
                tracing::debug!(media_id, kind, generation, "Watchlist mutation superseded");
                MutationOutcome::Superseded
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    media_id,
                    kind,
                    provider = self.remote.name(),
                    "Watchlist mutation failed, scheduling resync"
                );
                state.needs_resync = true;
                state.mutations.mark_reconciling(&media_id);
                MutationOutcome::Reverted {
                    reason: e.to_string(),
                }
            }
        };

        state.mutations.finish(&media_id);
        outcome
    }

    async fn after_confirm(&self) {
        if self.queued.fetch_sub(1, Ordering::SeqCst) > 1 {
            return;
        }

        if !mutation::read(&self.state).needs_resync {
            return;
        }

        tracing::info!("Resynchronizing watchlist");
        if let Err(e) = self.load().await {
            tracing::error!(error = %e, "Watchlist resync failed");
        }
    }

    fn name(&self) -> &'static str {
        "watchlist"
    }
}

/// Shared client-side watchlist store
///
/// Cheap to clone; clones share state and the background worker.
#[derive(Clone)]
pub struct WatchlistStore {
    shared: Arc<Shared>,
    worker: WorkerHandle<Mutation>,
}

impl WatchlistStore {
    /// Must be called from within a Tokio runtime.
    pub fn new(remote: Arc<dyn WatchlistResource>, session: Session) -> Self {
        Self::with_timeout(remote, session, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        remote: Arc<dyn WatchlistResource>,
        session: Session,
        request_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            remote,
            session,
            request_timeout,
            state: RwLock::new(WatchlistState::default()),
            view: Mutex::new(FilteredView::default()),
            queued: AtomicUsize::new(0),
        });
        let worker = WorkerHandle::spawn(Arc::clone(&shared));

        Self { shared, worker }
    }

    /// Replaces local state with the remote list
    ///
    /// On failure prior state is left untouched.
    pub async fn load(&self) -> AppResult<()> {
        self.shared.load().await
    }

    /// Optimistically prepends a provisional entry and queues the insert
    ///
    /// An entry already present for `(media_id, media_type)` is not
    /// duplicated locally.
    pub fn add(&self, media_id: i64, media_type: MediaType) -> AppResult<PendingMutation> {
        let user_id = self.shared.session.user_id()?;
        validate_media_id(media_id)?;

        let mut state = mutation::write(&self.shared.state);
        let exists = state
            .entries
            .iter()
            .any(|e| e.media_id == media_id && e.media_type == media_type);

        if !exists {
            let id = state.next_provisional_id();
            state
                .entries
                .insert(0, WatchlistEntry::provisional(id, media_id, media_type, user_id));
            state.revision += 1;
        }

        self.submit(
            &mut state,
            Mutation::Add {
                media_id,
                media_type,
            },
        )
    }

    /// Optimistically drops the first entry for `media_id` and queues the delete
    pub fn remove(&self, media_id: i64) -> AppResult<PendingMutation> {
        self.shared.session.user_id()?;
        validate_media_id(media_id)?;

        let mut state = mutation::write(&self.shared.state);
        let media_type = state.position(media_id).map(|idx| {
            let removed = state.entries.remove(idx);
            state.revision += 1;
            removed.media_type
        });

        self.submit(
            &mut state,
            Mutation::Remove {
                media_id,
                media_type,
            },
        )
    }

    /// Optimistically sets the status of the entry for `media_id`
    pub fn update_status(&self, media_id: i64, status: WatchStatus) -> AppResult<PendingMutation> {
        self.shared.session.user_id()?;
        validate_media_id(media_id)?;

        let mut state = mutation::write(&self.shared.state);
        let media_type = match state.position(media_id) {
            Some(idx) => {
                let entry = &mut state.entries[idx];
                entry.status = status;
                let media_type = entry.media_type;
                state.revision += 1;
                Some(media_type)
            }
            None => None,
        };

        self.submit(
            &mut state,
            Mutation::UpdateStatus {
                media_id,
                media_type,
                status,
            },
        )
    }

    fn submit(&self, state: &mut WatchlistState, mutation: Mutation) -> AppResult<PendingMutation> {
        if self.worker.is_closed() {
            return Err(AppError::Internal("watchlist store has shut down".to_string()));
        }

        let media_id = mutation.media_id();
        let generation = state.mutations.begin(media_id);
        state.submitted += 1;
        self.shared.queued.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(media_id, kind = mutation.kind(), generation, "Watchlist mutation queued");

        self.worker.submit(mutation, generation).map_err(|e| {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            state.mutations.finish(&media_id);
            e
        })
    }

    pub fn is_in_watchlist(&self, media_id: i64) -> bool {
        mutation::read(&self.shared.state).position(media_id).is_some()
    }

    pub fn is_watched(&self, media_id: i64) -> bool {
        mutation::read(&self.shared.state)
            .entries
            .iter()
            .any(|e| e.media_id == media_id && e.is_watched())
    }

    /// Snapshot of the canonical entry list
    pub fn entries(&self) -> Vec<WatchlistEntry> {
        mutation::read(&self.shared.state).entries.clone()
    }

    pub fn entry(&self, media_id: i64) -> Option<WatchlistEntry> {
        let state = mutation::read(&self.shared.state);
        state.position(media_id).map(|idx| state.entries[idx].clone())
    }

    pub fn len(&self) -> usize {
        mutation::read(&self.shared.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_filter(&self, criteria: FilterCriteria) {
        mutation::write(&self.shared.state).filter = criteria;
    }

    pub fn filter(&self) -> FilterCriteria {
        mutation::read(&self.shared.state).filter
    }

    /// Entries passing the current filter
    pub fn filtered_entries(&self) -> Arc<Vec<WatchlistEntry>> {
        let state = mutation::read(&self.shared.state);
        let mut view = mutation::lock(&self.shared.view);
        view.get(&state.entries, state.revision, &state.filter, &state.genres)
    }

    pub fn set_genres(&self, media_id: i64, media_type: MediaType, genre_ids: Vec<i64>) {
        mutation::write(&self.shared.state)
            .genres
            .insert(media_id, media_type, genre_ids);
    }

    /// Fetches genres for every entry not yet in the genre index
    ///
    /// Lookups run in parallel; failures are logged and skipped unless
    /// nothing could be fetched. Returns the number of media indexed.
    pub async fn refresh_genres(&self, provider: Arc<dyn MetadataProvider>) -> AppResult<usize> {
        let missing: HashSet<(i64, MediaType)> = {
            let state = mutation::read(&self.shared.state);
            state
                .entries
                .iter()
                .filter(|e| !state.genres.contains(e.media_id, e.media_type))
                .map(|e| (e.media_id, e.media_type))
                .collect()
        };

        if missing.is_empty() {
            return Ok(0);
        }

        let timeout = self.shared.request_timeout;
        let mut tasks = Vec::new();

        for (media_id, media_type) in missing {
            let provider = Arc::clone(&provider);
            let task = tokio::spawn(async move {
                let result = tokio::time::timeout(timeout, provider.genre_ids(media_id, media_type))
                    .await
                    .map_err(|_| AppError::Timeout(timeout))
                    .and_then(|r| r);
                (media_id, media_type, result)
            });
            tasks.push(task);
        }

        let mut indexed = 0;
        let mut errors = 0;

        for task in tasks {
            match task.await {
                Ok((media_id, media_type, Ok(genre_ids))) => {
                    self.set_genres(media_id, media_type, genre_ids);
                    indexed += 1;
                }
                Ok((media_id, media_type, Err(e))) => {
                    tracing::warn!(
                        error = %e,
                        media_id,
                        media_type = %media_type,
                        provider = provider.name(),
                        "Genre fetch failed"
                    );
                    errors += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Task join error");
                    errors += 1;
                }
            }
        }

        if errors > 0 {
            tracing::warn!(
                success_count = indexed,
                error_count = errors,
                "Partial genre fetch failure"
            );
        }

        if indexed == 0 && errors > 0 {
            return Err(AppError::Remote("Failed to fetch any genre data".to_string()));
        }

        Ok(indexed)
    }

    pub fn mutation_phase(&self, media_id: i64) -> MutationPhase {
        mutation::read(&self.shared.state).mutations.phase(&media_id)
    }

    /// Waits until every mutation submitted so far is confirmed or reconciled
    pub async fn settled(&self) {
        self.worker.barrier().await;
    }

    /// Drains queued mutations and stops the worker
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::{MockMetadataProvider, MockWatchlistResource};
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn server_entry(id: i64, media_id: i64, media_type: MediaType, status: WatchStatus) -> WatchlistEntry {
        WatchlistEntry {
            id,
            media_id,
            media_type,
            user_id: "user_1".to_string(),
            status,
            added_at: Utc::now(),
        }
    }

    fn create_test_store(remote: MockWatchlistResource) -> WatchlistStore {
        WatchlistStore::new(Arc::new(remote), Session::authenticated("user_1"))
    }

    fn mock_remote() -> MockWatchlistResource {
        let mut remote = MockWatchlistResource::new();
        remote.expect_name().return_const("mock");
        remote
    }

    #[tokio::test]
    async fn test_loaded_entry_then_status_update() {
        let mut remote = mock_remote();
        remote.expect_list().returning(|| {
            Ok(vec![server_entry(1, 42, MediaType::Movie, WatchStatus::Active)])
        });
        remote
            .expect_update_status()
            .withf(|media_id, media_type, status| {
                *media_id == 42 && *media_type == Some(MediaType::Movie) && *status == WatchStatus::Watched
            })
            .returning(|_, _, _| Ok(()));

        let store = create_test_store(remote);
        assert_ok!(store.load().await);

        assert!(store.is_in_watchlist(42));
        assert!(!store.is_watched(42));

        let pending = assert_ok!(store.update_status(42, WatchStatus::Watched));
        // visible before the remote call resolves
        assert!(store.is_watched(42));
        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
        assert!(store.is_watched(42));
    }

    #[tokio::test]
    async fn test_add_applies_optimistically_then_takes_server_id() {
        let mut remote = mock_remote();
        remote
            .expect_add()
            .returning(|media_id, media_type| {
                Ok(AddOutcome::Inserted(server_entry(100, media_id, media_type, WatchStatus::Active)))
            });

        let store = create_test_store(remote);
        let pending = assert_ok!(store.add(5, MediaType::Movie));

        let provisional = store.entry(5).unwrap();
        assert!(provisional.is_provisional());
        assert_eq!(provisional.status, WatchStatus::Active);
        assert_eq!(store.mutation_phase(5), MutationPhase::OptimisticPending);

        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
        assert!(store.is_in_watchlist(5));
        assert_eq!(store.entry(5).unwrap().id, 100);
        assert_eq!(store.mutation_phase(5), MutationPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_add_resyncs_to_server_state() {
        let mut remote = mock_remote();
        remote
            .expect_add()
            .returning(|_, _| Err(AppError::Remote("503 Service Unavailable".to_string())));
        remote
            .expect_list()
            .returning(|| Ok(vec![server_entry(9, 3, MediaType::Tv, WatchStatus::Watched)]));

        let store = create_test_store(remote);
        let pending = assert_ok!(store.add(5, MediaType::Movie));
        assert!(store.is_in_watchlist(5));

        assert!(matches!(pending.outcome().await, MutationOutcome::Reverted { .. }));
        store.settled().await;

        assert!(!store.is_in_watchlist(5));
        assert!(store.is_in_watchlist(3));
        assert_eq!(store.len(), 1);
        assert_eq!(store.mutation_phase(5), MutationPhase::Idle);
    }

    #[tokio::test]
    async fn test_repeated_add_keeps_one_entry() {
        let mut remote = mock_remote();
        let calls = Arc::new(AtomicUsize::new(0));
        let add_calls = Arc::clone(&calls);
        remote.expect_add().returning(move |media_id, media_type| {
            if add_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(AddOutcome::Inserted(server_entry(11, media_id, media_type, WatchStatus::Active)))
            } else {
                Ok(AddOutcome::AlreadyPresent)
            }
        });
        remote
            .expect_list()
            .returning(|| Ok(vec![server_entry(11, 5, MediaType::Movie, WatchStatus::Active)]));

        let store = create_test_store(remote);
        let first = assert_ok!(store.add(5, MediaType::Movie));
        let second = assert_ok!(store.add(5, MediaType::Movie));
        assert_eq!(store.len(), 1);

        assert_eq!(first.outcome().await, MutationOutcome::Superseded);
        assert_eq!(second.outcome().await, MutationOutcome::AlreadyPresent);
        store.settled().await;

        let matching = store
            .entries()
            .into_iter()
            .filter(|e| e.media_id == 5 && e.media_type == MediaType::Movie)
            .count();
        assert_eq!(matching, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_add_then_remove_is_not_resurrected() {
        let mut remote = mock_remote();
        remote.expect_add().returning(|media_id, media_type| {
            Ok(AddOutcome::Inserted(server_entry(12, media_id, media_type, WatchStatus::Active)))
        });
        remote
            .expect_remove()
            .withf(|media_id, media_type| *media_id == 7 && *media_type == Some(MediaType::Tv))
            .returning(|_, _| Ok(()));

        let store = create_test_store(remote);
        let added = assert_ok!(store.add(7, MediaType::Tv));
        let removed = assert_ok!(store.remove(7));
        assert!(!store.is_in_watchlist(7));

        assert_eq!(added.outcome().await, MutationOutcome::Superseded);
        assert_eq!(removed.outcome().await, MutationOutcome::Confirmed);
        assert!(!store.is_in_watchlist(7));
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let mut remote = mock_remote();
        remote.expect_add().returning(|media_id, media_type| {
            Ok(AddOutcome::Inserted(server_entry(13, media_id, media_type, WatchStatus::Active)))
        });
        remote.expect_update_status().returning(|_, _, _| Ok(()));

        let store = create_test_store(remote);
        assert_ok!(store.add(7, MediaType::Tv));

        assert_ok!(store.update_status(7, WatchStatus::Watched));
        assert!(store.is_watched(7));

        let not_watched: WatchStatus = assert_ok!("not watched".parse());
        assert_ok!(store.update_status(7, not_watched));
        assert!(!store.is_watched(7));

        store.settled().await;
        assert!(!store.is_watched(7));
    }

    #[tokio::test]
    async fn test_unauthenticated_mutation_leaves_state_alone() {
        let store = WatchlistStore::new(Arc::new(mock_remote()), Session::anonymous());

        let result = store.add(5, MediaType::Movie);
        assert!(matches!(result, Err(AppError::Unauthenticated)));
        assert!(store.is_empty());

        assert!(matches!(store.load().await, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_invalid_media_id_is_rejected() {
        let store = create_test_store(mock_remote());
        assert!(matches!(store.add(0, MediaType::Movie), Err(AppError::InvalidInput(_))));
        assert!(matches!(store.remove(-4), Err(AppError::InvalidInput(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_prior_entries() {
        let mut remote = mock_remote();
        let calls = AtomicUsize::new(0);
        remote.expect_list().returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![server_entry(1, 42, MediaType::Movie, WatchStatus::Active)])
            } else {
                Err(AppError::Remote("connection reset".to_string()))
            }
        });

        let store = create_test_store(remote);
        assert_ok!(store.load().await);
        let err = assert_err!(store.load().await);
        assert!(err.is_remote_failure());
        assert!(store.is_in_watchlist(42));
    }

    #[tokio::test]
    async fn test_filtered_entries_follow_filter_and_entries() {
        let mut remote = mock_remote();
        remote.expect_list().returning(|| {
            Ok(vec![
                server_entry(1, 10, MediaType::Movie, WatchStatus::Watched),
                server_entry(2, 20, MediaType::Tv, WatchStatus::Active),
            ])
        });
        remote.expect_remove().returning(|_, _| Ok(()));

        let store = create_test_store(remote);
        assert_ok!(store.load().await);
        assert_eq!(store.filtered_entries().len(), 2);

        store.set_filter(FilterCriteria::new().media_type(MediaType::Movie).watched(true));
        let filtered = store.filtered_entries();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].media_id, 10);

        store.set_filter(FilterCriteria::new().media_type(MediaType::Tv).watched(true));
        assert!(store.filtered_entries().is_empty());

        store.set_filter(FilterCriteria::new().media_type(MediaType::Movie));
        assert_ok!(store.remove(10));
        assert!(store.filtered_entries().is_empty());
        // canonical list untouched by filtering
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_genres_indexes_entries() {
        let mut remote = mock_remote();
        remote.expect_list().returning(|| {
            Ok(vec![
                server_entry(1, 550, MediaType::Movie, WatchStatus::Active),
                server_entry(2, 1399, MediaType::Tv, WatchStatus::Active),
            ])
        });

        let mut provider = MockMetadataProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_genre_ids().returning(|media_id, _| match media_id {
            550 => Ok(vec![18, 53]),
            _ => Err(AppError::Remote("404 Not Found".to_string())),
        });

        let store = create_test_store(remote);
        assert_ok!(store.load().await);

        let indexed = assert_ok!(store.refresh_genres(Arc::new(provider)).await);
        assert_eq!(indexed, 1);

        store.set_filter(FilterCriteria::new().genre(18));
        let filtered = store.filtered_entries();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].media_id, 550);
    }

    #[tokio::test]
    async fn test_refresh_genres_fails_when_nothing_fetched() {
        let mut remote = mock_remote();
        remote
            .expect_list()
            .returning(|| Ok(vec![server_entry(1, 550, MediaType::Movie, WatchStatus::Active)]));

        let mut provider = MockMetadataProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_genre_ids()
            .returning(|_, _| Err(AppError::Remote("401 Unauthorized".to_string())));

        let store = create_test_store(remote);
        assert_ok!(store.load().await);
        assert_err!(store.refresh_genres(Arc::new(provider)).await);
    }

    /// Remote whose inserts never answer in time
    struct StalledWatchlist;

    #[async_trait::async_trait]
    impl WatchlistResource for StalledWatchlist {
        async fn list(&self) -> AppResult<Vec<WatchlistEntry>> {
            Ok(vec![])
        }

        async fn add(&self, _media_id: i64, _media_type: MediaType) -> AppResult<AddOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AddOutcome::AlreadyPresent)
        }

        async fn remove(&self, _media_id: i64, _media_type: Option<MediaType>) -> AppResult<()> {
            Ok(())
        }

        async fn update_status(
            &self,
            _media_id: i64,
            _media_type: Option<MediaType>,
            _status: WatchStatus,
        ) -> AppResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_remote_failure() {
        let store = WatchlistStore::with_timeout(
            Arc::new(StalledWatchlist),
            Session::authenticated("user_1"),
            Duration::from_millis(50),
        );

        let pending = assert_ok!(store.add(5, MediaType::Movie));
        match pending.outcome().await {
            MutationOutcome::Reverted { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected Reverted, got {:?}", other),
        }

        store.settled().await;
        assert!(!store.is_in_watchlist(5));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_rejects_new_mutations() {
        let mut remote = mock_remote();
        remote.expect_add().returning(|media_id, media_type| {
            Ok(AddOutcome::Inserted(server_entry(1, media_id, media_type, WatchStatus::Active)))
        });

        let store = create_test_store(remote);
        let pending = assert_ok!(store.add(5, MediaType::Movie));
        store.shutdown().await;

        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
        assert!(matches!(store.add(6, MediaType::Movie), Err(AppError::Internal(_))));
    }

    /// In-memory remote whose lists can be held open mid-fetch
    ///
    /// A list snapshots the rows before waiting, like a response already in
    /// transit. The first `gated_lists` calls wait on `release`; adds wait on
    /// `release_adds` while `hold_adds` is set.
    #[derive(Default)]
    struct GatedWatchlist {
        rows: std::sync::Mutex<Vec<WatchlistEntry>>,
        gated_lists: AtomicUsize,
        list_calls: AtomicUsize,
        list_started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        hold_adds: std::sync::atomic::AtomicBool,
        release_adds: tokio::sync::Notify,
    }

    impl GatedWatchlist {
        fn gating(lists: usize) -> Arc<Self> {
            let remote = Self::default();
            remote.gated_lists.store(lists, Ordering::SeqCst);
            Arc::new(remote)
        }
    }

    #[async_trait::async_trait]
    impl WatchlistResource for GatedWatchlist {
        async fn list(&self) -> AppResult<Vec<WatchlistEntry>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshot = self.rows.lock().unwrap().clone();
            snapshot.reverse();

            let gated = self
                .gated_lists
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if gated {
                self.list_started.notify_one();
                self.release.notified().await;
            }
            Ok(snapshot)
        }

        async fn add(&self, media_id: i64, media_type: MediaType) -> AppResult<AddOutcome> {
            if self.hold_adds.load(Ordering::SeqCst) {
                self.release_adds.notified().await;
            }
            let mut rows = self.rows.lock().unwrap();
            let entry = server_entry(rows.len() as i64 + 100, media_id, media_type, WatchStatus::Active);
            rows.push(entry.clone());
            Ok(AddOutcome::Inserted(entry))
        }

        async fn remove(&self, media_id: i64, media_type: Option<MediaType>) -> AppResult<()> {
            self.rows
                .lock()
                .unwrap()
                .retain(|e| !(e.media_id == media_id && media_type.map_or(true, |t| t == e.media_type)));
            Ok(())
        }

        async fn update_status(
            &self,
            _media_id: i64,
            _media_type: Option<MediaType>,
            _status: WatchStatus,
        ) -> AppResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn spawn_load(store: &WatchlistStore) -> tokio::task::JoinHandle<AppResult<()>> {
        let store = store.clone();
        tokio::spawn(async move { store.load().await })
    }

    #[tokio::test]
    async fn test_add_confirmed_during_load_survives() {
        let remote = GatedWatchlist::gating(1);
        let store = WatchlistStore::new(remote.clone(), Session::authenticated("user_1"));

        let loader = spawn_load(&store);
        remote.list_started.notified().await;

        let pending = assert_ok!(store.add(5, MediaType::Movie));
        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);

        // the held list predates the add
        remote.release.notify_one();
        assert_ok!(loader.await.unwrap());

        assert!(store.is_in_watchlist(5));
        assert_eq!(store.entry(5).unwrap().id, 100);
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_defers_to_worker_while_mutations_queued() {
        let remote = GatedWatchlist::gating(1);
        remote.hold_adds.store(true, Ordering::SeqCst);
        let store = WatchlistStore::new(remote.clone(), Session::authenticated("user_1"));

        let loader = spawn_load(&store);
        remote.list_started.notified().await;

        let pending = assert_ok!(store.add(5, MediaType::Movie));
        remote.release.notify_one();
        assert_ok!(loader.await.unwrap());

        // stale list not applied; the optimistic entry stays
        assert!(store.entry(5).unwrap().is_provisional());
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 1);

        remote.release_adds.notify_one();
        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
        store.settled().await;

        // the worker ran the deferred resync once the queue drained
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.entry(5).unwrap().id, 100);
        assert_eq!(store.mutation_phase(5), MutationPhase::Idle);
    }

    #[tokio::test]
    async fn test_older_load_is_discarded() {
        let remote = GatedWatchlist::gating(1);
        remote
            .rows
            .lock()
            .unwrap()
            .push(server_entry(1, 42, MediaType::Movie, WatchStatus::Active));
        let store = WatchlistStore::new(remote.clone(), Session::authenticated("user_1"));

        let older = spawn_load(&store);
        remote.list_started.notified().await;

        // another client adds while the first list is held
        remote
            .rows
            .lock()
            .unwrap()
            .push(server_entry(2, 7, MediaType::Tv, WatchStatus::Watched));
        assert_ok!(store.load().await);
        assert_eq!(store.len(), 2);

        remote.release.notify_one();
        assert_ok!(older.await.unwrap());

        assert_eq!(store.len(), 2);
        assert!(store.is_watched(7));
    }

    #[tokio::test]
    async fn test_load_stale_on_every_attempt_keeps_local_state() {
        let remote = GatedWatchlist::gating(MAX_LOAD_ATTEMPTS);
        let store = WatchlistStore::new(remote.clone(), Session::authenticated("user_1"));

        let loader = spawn_load(&store);
        for media_id in [5, 6, 7] {
            remote.list_started.notified().await;
            let pending = assert_ok!(store.add(media_id, MediaType::Movie));
            assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
            remote.release.notify_one();
        }

        let err = assert_err!(loader.await.unwrap());
        assert!(err.is_remote_failure());

        let ids: Vec<i64> = store.entries().iter().map(|e| e.media_id).collect();
        assert_eq!(ids, vec![7, 6, 5]);

        // a quiet load then applies the server list
        assert_ok!(store.load().await);
        let ids: Vec<i64> = store.entries().iter().map(|e| e.media_id).collect();
        assert_eq!(ids, vec![7, 6, 5]);
        assert!(store.entries().iter().all(|e| !e.is_provisional()));
    }
}
