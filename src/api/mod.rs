pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/bid-request", post(handlers::handle_bid_request))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .with_state(state)
}
