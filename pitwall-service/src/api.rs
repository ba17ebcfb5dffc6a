//! API module for the pitwall backend.
//!
//! This module defines all HTTP endpoints the backend serves and organizes
//! them into submodules:
//!
//! - [`errors`] – API error types and conversions from internal service errors.
//! - [`middleware`] – correlation id, bearer-token auth, driver ownership.
//! - [`auth`] – `POST /auth/ir/callback` and `POST /auth/refresh`.
//! - [`ingestion`] – `POST /ingestion/race`.
//! - [`analytics`] – analytics and dimension endpoints.
//! - [`journal`] – journal CRUD endpoints.
//! - [`content`] – thin read adapters over upstream catalogues.
//! - [`ws`] – the WebSocket endpoint (`/ws`).
//! - [`health`] – `/health`.

use axum::Json;
use serde::Serialize;

use pitwall_types::api::v1::ApiEnvelope;

use crate::api::middleware::CorrelationId;

pub(crate) mod analytics;
pub(crate) mod auth;
pub(crate) mod content;
pub mod errors;
pub(crate) mod health;
pub(crate) mod ingestion;
pub(crate) mod journal;
pub mod middleware;
pub(crate) mod ws;

/// Wraps a successful response body in the common envelope.
pub(crate) fn envelope<T: Serialize>(
    correlation: &CorrelationId,
    response: T,
) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        response,
        correlation_id: correlation.0.clone(),
    })
}
