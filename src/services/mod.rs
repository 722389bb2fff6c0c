pub mod providers;

pub use providers::{EpisodeWatchlistResource, MetadataProvider, WatchlistResource};
