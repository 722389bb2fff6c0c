//! Client-side stores mirroring server-persisted watchlist state
//!
//! Both stores share the same shape: optimistic local changes applied
//! synchronously, confirmed in order by one background worker per store.

use std::time::Duration;

pub mod episodes;
pub mod filter;
pub mod mutation;
pub mod watchlist;
pub(crate) mod worker;

pub use episodes::EpisodeWatchlistStore;
pub use filter::{FilterCriteria, GenreIndex};
pub use mutation::{MutationOutcome, MutationPhase, PendingMutation};
pub use watchlist::WatchlistStore;

/// Per remote call, unless a store is built with its own timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
