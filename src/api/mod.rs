//! Reference server for the watchlist resources the stores talk to
//!
//! Backed by in-memory tables; the caller is identified by the `x-user-id`
//! header.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
