//! API routes definition

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use flock_core::store::Store;
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn build_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        // Account routes
        .route(
            "/users",
            post(handlers::create_user::<S>)
                .get(handlers::get_user::<S>)
                .delete(handlers::delete_user::<S>),
        )
        // Graph routes
        .route("/follow", post(handlers::follow::<S>))
        .route("/unfollow", post(handlers::unfollow::<S>))
        // Post and timeline routes
        .route("/status", post(handlers::publish::<S>))
        .route("/timelines", get(handlers::get_timeline::<S>))
        .route("/health", get(handlers::health::<S>))
        .with_state(state)
}
