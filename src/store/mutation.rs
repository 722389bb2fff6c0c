use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::oneshot;

/// Where a single entity key is in the optimistic-update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Local state matches the last server response for this key
    Idle,
    /// An optimistic change is applied and its remote call not yet resolved
    OptimisticPending,
    /// A remote call failed or was ambiguous; waiting on a resync
    Reconciling,
}

/// Final result of one queued mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The remote accepted the change; local state was already correct
    Confirmed,
    /// The remote insert was a no-op because the row existed; a resync runs
    AlreadyPresent,
    /// A newer mutation on the same key was submitted before this one
    /// resolved, so its confirmation did not touch local state
    Superseded,
    /// The remote call failed and local state was reconciled
    Reverted { reason: String },
}

/// Handle to a mutation whose optimistic part is already applied
///
/// Awaiting it is optional; dropping it does not cancel the remote call.
#[derive(Debug)]
pub struct PendingMutation {
    rx: oneshot::Receiver<MutationOutcome>,
}

impl PendingMutation {
    pub(crate) fn channel() -> (oneshot::Sender<MutationOutcome>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Waits for the remote confirmation or reconciliation
    pub async fn outcome(self) -> MutationOutcome {
        self.rx.await.unwrap_or_else(|_| MutationOutcome::Reverted {
            reason: "store worker stopped before the mutation resolved".to_string(),
        })
    }
}

#[derive(Debug)]
struct KeyState {
    phase: MutationPhase,
    generation: u64,
    in_flight: usize,
}

/// Per-key bookkeeping of in-flight mutations
///
/// Every mutation bumps the key's generation; a confirmation is only allowed
/// to write local state when its generation is still the latest.
#[derive(Debug)]
pub struct MutationTracker<K> {
    keys: HashMap<K, KeyState>,
}

impl<K: Eq + Hash + Clone> Default for MutationTracker<K> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> MutationTracker<K> {
    /// Registers a new mutation for `key` and returns its generation
    pub fn begin(&mut self, key: K) -> u64 {
        let state = self.keys.entry(key).or_insert(KeyState {
            phase: MutationPhase::Idle,
            generation: 0,
            in_flight: 0,
        });
        state.generation += 1;
        state.in_flight += 1;
        state.phase = MutationPhase::OptimisticPending;
        state.generation
    }

    pub fn is_latest(&self, key: &K, generation: u64) -> bool {
        self.keys
            .get(key)
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.keys.get(key).map(|s| s.in_flight > 0).unwrap_or(false)
    }

    /// Marks one mutation of `key` as resolved
    ///
    /// A key with nothing left in flight returns to `Idle` unless it is
    /// waiting on a resync.
    pub fn finish(&mut self, key: &K) {
        let remove = match self.keys.get_mut(key) {
            Some(state) => {
                state.in_flight = state.in_flight.saturating_sub(1);
                if state.in_flight == 0 && state.phase == MutationPhase::OptimisticPending {
                    state.phase = MutationPhase::Idle;
                }
                state.in_flight == 0 && state.phase == MutationPhase::Idle
            }
            None => false,
        };
        if remove {
            self.keys.remove(key);
        }
    }

    pub fn mark_reconciling(&mut self, key: &K) {
        if let Some(state) = self.keys.get_mut(key) {
            state.phase = MutationPhase::Reconciling;
        }
    }

    /// Clears every `Reconciling` key with nothing in flight
    pub fn settle_reconciled(&mut self) {
        self.keys
            .retain(|_, s| !(s.in_flight == 0 && s.phase == MutationPhase::Reconciling));
    }

    pub fn phase(&self, key: &K) -> MutationPhase {
        self.keys
            .get(key)
            .map(|s| s.phase)
            .unwrap_or(MutationPhase::Idle)
    }

    pub fn in_flight_total(&self) -> usize {
        self.keys.values().map(|s| s.in_flight).sum()
    }
}

// Store locks are never held across an await, so a poisoned lock only means a
// panic elsewhere; the data is still usable.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_is_idle() {
        let tracker: MutationTracker<i64> = MutationTracker::default();
        assert_eq!(tracker.phase(&1), MutationPhase::Idle);
        assert!(!tracker.is_latest(&1, 1));
    }

    #[test]
    fn test_begin_and_finish_cycle() {
        let mut tracker = MutationTracker::default();
        let generation = tracker.begin(7_i64);
        assert_eq!(tracker.phase(&7), MutationPhase::OptimisticPending);
        assert!(tracker.is_latest(&7, generation));

        tracker.finish(&7);
        assert_eq!(tracker.phase(&7), MutationPhase::Idle);
        assert_eq!(tracker.in_flight_total(), 0);
    }

    #[test]
    fn test_newer_mutation_supersedes_older() {
        let mut tracker = MutationTracker::default();
        let first = tracker.begin(7_i64);
        let second = tracker.begin(7_i64);

        assert!(!tracker.is_latest(&7, first));
        assert!(tracker.is_latest(&7, second));

        tracker.finish(&7);
        assert_eq!(tracker.phase(&7), MutationPhase::OptimisticPending);
        assert!(tracker.is_latest(&7, second));

        tracker.finish(&7);
        assert_eq!(tracker.phase(&7), MutationPhase::Idle);
    }

    #[test]
    fn test_reconciling_survives_finish_until_settled() {
        let mut tracker = MutationTracker::default();
        tracker.begin(3_i64);
        tracker.mark_reconciling(&3);
        tracker.finish(&3);
        assert_eq!(tracker.phase(&3), MutationPhase::Reconciling);

        tracker.settle_reconciled();
        assert_eq!(tracker.phase(&3), MutationPhase::Idle);
    }

    #[test]
    fn test_settle_keeps_keys_with_work_in_flight() {
        let mut tracker = MutationTracker::default();
        tracker.begin(3_i64);
        tracker.mark_reconciling(&3);
        tracker.settle_reconciled();
        assert_eq!(tracker.phase(&3), MutationPhase::Reconciling);
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_reverted() {
        let (tx, pending) = PendingMutation::channel();
        drop(tx);
        assert!(matches!(
            pending.outcome().await,
            MutationOutcome::Reverted { .. }
        ));
    }

    #[tokio::test]
    async fn test_outcome_is_delivered() {
        let (tx, pending) = PendingMutation::channel();
        tx.send(MutationOutcome::Confirmed).unwrap();
        assert_eq!(pending.outcome().await, MutationOutcome::Confirmed);
    }
}
