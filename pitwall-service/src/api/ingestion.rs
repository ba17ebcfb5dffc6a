//! The ingestion request endpoint.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use http::StatusCode;

use pitwall_types::{
    ConnectionId,
    api::v1::{IngestionQueuedResponse, IngestionRequest},
    events::IngestionJob,
};

use crate::{
    AppState,
    api::{envelope, errors::ApiError, middleware::{AuthContext, CorrelationId}},
};

/// `POST /ingestion/race` — queues an ingestion job for the authenticated
/// driver.
///
/// Answers 429 with `Retry-After` while the driver's ingestion lock is
/// active; the worker re-checks the lock anyway, this is just the fast
/// path. On success the job is published and the request returns 202.
pub(crate) async fn request_ingestion(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<IngestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let driver_id = auth.driver_id();
    let driver = state
        .store
        .get_driver(driver_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound("driver"))?;

    let now = Utc::now();
    if let Some(until) = driver.ingestion_blocked_until
        && until > now
    {
        let retry_after_secs = (until - now).num_seconds().max(1) as u64;
        return Err(ApiError::Busy { retry_after_secs });
    }

    let Some(notify_connection_id) = body
        .notify_connection_id
        .filter(|value| !value.is_empty())
    else {
        return Err(ApiError::missing_field("notifyConnectionId"));
    };

    let job = IngestionJob {
        driver_id,
        iracing_access_token: auth.sensitive.access_token.clone(),
        notify_connection_id: Some(ConnectionId::new(notify_connection_id)),
    };
    state.queue.publish(&job).await.map_err(ApiError::Internal)?;
    tracing::info!("queued ingestion job for driver {driver_id}");

    Ok((
        StatusCode::ACCEPTED,
        envelope(
            &correlation,
            IngestionQueuedResponse {
                status: "queued".to_owned(),
            },
        ),
    ))
}
