//! Analytics endpoints.

use axum::{
    Extension,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use pitwall_types::{
    DriverId,
    api::v1::{Dimension, FieldError, Granularity},
};

use crate::{
    AppState,
    api::{envelope, errors::ApiError, middleware::CorrelationId},
    services::analytics::AnalyticsRequest,
};

/// Raw query parameters; list-valued filters arrive comma-separated.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalyticsQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    group_by: Option<String>,
    granularity: Option<String>,
    series_ids: Option<String>,
    car_ids: Option<String>,
    track_ids: Option<String>,
}

/// `GET /drivers/{driver_id}/analytics`.
pub(crate) async fn get_analytics(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(driver_id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_query(DriverId::new(driver_id), query)?;
    let response = state
        .analytics
        .get_analytics(&request)
        .await
        .map_err(ApiError::Internal)?;
    Ok(envelope(&correlation, response))
}

/// `GET /drivers/{driver_id}/analytics/dimensions`.
pub(crate) async fn get_dimensions(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(driver_id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, to) = require_window(&query)?;
    let response = state
        .analytics
        .get_dimensions(DriverId::new(driver_id), from, to)
        .await
        .map_err(ApiError::Internal)?;
    Ok(envelope(&correlation, response))
}

fn require_window(query: &AnalyticsQuery) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let mut field_errors = Vec::new();
    if query.from.is_none() {
        field_errors.push(FieldError {
            field: "from".to_owned(),
            message: "is required".to_owned(),
        });
    }
    if query.to.is_none() {
        field_errors.push(FieldError {
            field: "to".to_owned(),
            message: "is required".to_owned(),
        });
    }
    match (query.from, query.to) {
        (Some(from), Some(to)) => Ok((from, to)),
        _ => Err(ApiError::InvalidInput {
            errors: vec![],
            field_errors,
        }),
    }
}

fn parse_query(driver_id: DriverId, query: AnalyticsQuery) -> Result<AnalyticsRequest, ApiError> {
    let (from, to) = require_window(&query)?;
    let mut field_errors = Vec::new();

    let group_by: Vec<Dimension> = match &query.group_by {
        None => vec![],
        Some(raw) => raw
            .split(',')
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse() {
                Ok(dimension) => Some(dimension),
                Err(message) => {
                    field_errors.push(FieldError {
                        field: "group_by".to_owned(),
                        message,
                    });
                    None
                }
            })
            .collect(),
    };

    let granularity: Option<Granularity> = match &query.granularity {
        None => None,
        Some(raw) => match raw.parse() {
            Ok(granularity) => Some(granularity),
            Err(message) => {
                field_errors.push(FieldError {
                    field: "granularity".to_owned(),
                    message,
                });
                None
            }
        },
    };

    let series_ids = parse_id_list("series_ids", &query.series_ids, &mut field_errors);
    let car_ids = parse_id_list("car_ids", &query.car_ids, &mut field_errors);
    let track_ids = parse_id_list("track_ids", &query.track_ids, &mut field_errors);

    if !field_errors.is_empty() {
        return Err(ApiError::InvalidInput {
            errors: vec![],
            field_errors,
        });
    }
    Ok(AnalyticsRequest {
        driver_id,
        from,
        to,
        group_by,
        granularity,
        series_ids,
        car_ids,
        track_ids,
    })
}

fn parse_id_list(
    field: &str,
    raw: &Option<String>,
    field_errors: &mut Vec<FieldError>,
) -> Vec<i64> {
    let Some(raw) = raw else {
        return vec![];
    };
    raw.split(',')
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                field_errors.push(FieldError {
                    field: field.to_owned(),
                    message: format!("{part:?} is not a valid id"),
                });
                None
            }
        })
        .collect()
}
