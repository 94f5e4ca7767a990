//! HTTP/SSE edge.
//!
//! A thin translation layer over the supervisor: no state of its own beyond
//! the handle it is given.

pub mod routes;
pub mod sse;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::supervisor::ProcessSupervisor;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: ProcessSupervisor,
}

/// Build the router with every API route, permissive CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/run", post(routes::run))
        .route("/api/processes", get(routes::processes))
        .route("/api/process/{id}", get(routes::process))
        .route("/api/process/{id}/stop", post(routes::stop))
        .route("/api/process/{id}/command", post(routes::command))
        .route("/api/programs", get(routes::programs))
        .route("/api/state", get(routes::mirror_state))
        .route("/api/events", get(sse::events))
        .route("/api/test", get(routes::liveness))
        .route("/api/debug", get(routes::diagnostics))
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
