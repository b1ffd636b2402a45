pub mod chat;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router: run ingress plus interrupt/health endpoints.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(chat::health))
        .route("/v1/runs", post(chat::create_run))
        .route("/v1/sessions/:id/interrupt", post(chat::interrupt_session))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
