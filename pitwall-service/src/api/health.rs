//! Liveness probe.
//!
//! `/health` answers `200 healthy` unconditionally: every backend (store,
//! queue, key provider) is wired before the router binds, so a process that
//! accepts the request is serving. The answer is marked non-cacheable so
//! load balancers probe the process itself, not an intermediary.

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    routing::get,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::AppState;

/// Create a router containing the health endpoint.
pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { (StatusCode::OK, "healthy") }))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}
