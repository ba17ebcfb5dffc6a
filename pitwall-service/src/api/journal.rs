//! Journal endpoints.

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use http::StatusCode;

use pitwall_types::{DriverId, RaceId, api::v1::SaveJournalRequest};

use crate::{
    AppState,
    api::{envelope, errors::ApiError, middleware::CorrelationId},
};

/// `GET /drivers/{driver_id}/journal`.
pub(crate) async fn list_entries(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(driver_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .journal
        .list_entries(DriverId::new(driver_id))
        .await?;
    Ok(envelope(&correlation, entries))
}

/// `GET /drivers/{driver_id}/journal/{race_id}`.
pub(crate) async fn get_entry(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((driver_id, race_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .journal
        .get_entry(DriverId::new(driver_id), RaceId::new(race_id))
        .await?
        .ok_or(ApiError::NotFound("journal entry"))?;
    Ok(envelope(&correlation, entry))
}

/// `PUT /drivers/{driver_id}/journal/{race_id}`.
pub(crate) async fn save_entry(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((driver_id, race_id)): Path<(i64, i64)>,
    Json(body): Json<SaveJournalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .journal
        .save_entry(
            DriverId::new(driver_id),
            RaceId::new(race_id),
            body.notes,
            body.tags,
        )
        .await?;
    Ok(envelope(&correlation, entry))
}

/// `DELETE /drivers/{driver_id}/journal/{race_id}`.
pub(crate) async fn delete_entry(
    State(state): State<AppState>,
    Path((driver_id, race_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .journal
        .delete_entry(DriverId::new(driver_id), RaceId::new(race_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
