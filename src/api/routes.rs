use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/watchlist",
            get(handlers::list_watchlist)
                .post(handlers::add_to_watchlist)
                .put(handlers::update_watchlist_status)
                .delete(handlers::remove_from_watchlist),
        )
        .route(
            "/episode-watchlist",
            get(handlers::list_episodes)
                .post(handlers::mark_episode_watched)
                .delete(handlers::mark_episode_unwatched),
        )
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
