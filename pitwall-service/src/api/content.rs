//! Thin read adapters over the upstream catalogues (cars, tracks, series).

use axum::{Extension, extract::State, response::IntoResponse};
use secrecy::SecretString;

use crate::{
    AppState,
    api::{envelope, errors::ApiError, middleware::{AuthContext, CorrelationId}},
};

fn access_token(auth: &AuthContext) -> SecretString {
    SecretString::from(auth.sensitive.access_token.clone())
}

/// `GET /cars`.
pub(crate) async fn cars(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let cars = state.upstream.cars(&access_token(&auth)).await?;
    Ok(envelope(&correlation, cars))
}

/// `GET /cars/assets`.
pub(crate) async fn car_assets(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let assets = state.upstream.car_assets(&access_token(&auth)).await?;
    Ok(envelope(&correlation, assets))
}

/// `GET /tracks`.
pub(crate) async fn tracks(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let tracks = state.upstream.tracks(&access_token(&auth)).await?;
    Ok(envelope(&correlation, tracks))
}

/// `GET /tracks/assets`.
pub(crate) async fn track_assets(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let assets = state.upstream.track_assets(&access_token(&auth)).await?;
    Ok(envelope(&correlation, assets))
}

/// `GET /series`.
pub(crate) async fn series(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let series = state.upstream.series(&access_token(&auth)).await?;
    Ok(envelope(&correlation, series))
}
