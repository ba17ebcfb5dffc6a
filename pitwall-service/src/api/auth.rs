//! Auth endpoints: OAuth callback and session refresh.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use secrecy::SecretString;

use pitwall_types::api::v1::{AuthCallbackRequest, AuthSessionResponse, FieldError};

use crate::{
    AppState,
    api::{envelope, errors::ApiError, middleware::{AuthContext, CorrelationId}},
};

/// `POST /auth/ir/callback` — completes the authorization-code + PKCE flow.
pub(crate) async fn callback(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(body): Json<AuthCallbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut field_errors = Vec::new();
    for (field, value) in [
        ("code", &body.code),
        ("code_verifier", &body.code_verifier),
        ("redirect_uri", &body.redirect_uri),
    ] {
        if value.as_deref().is_none_or(str::is_empty) {
            field_errors.push(FieldError {
                field: field.to_owned(),
                message: "is required".to_owned(),
            });
        }
    }
    if !field_errors.is_empty() {
        return Err(ApiError::InvalidInput {
            errors: vec![],
            field_errors,
        });
    }
    let (code, code_verifier, redirect_uri) = (
        body.code.unwrap_or_default(),
        body.code_verifier.unwrap_or_default(),
        body.redirect_uri.unwrap_or_default(),
    );

    let session = state
        .auth
        .handle_callback(&code, &code_verifier, &redirect_uri)
        .await?;
    Ok(envelope(
        &correlation,
        AuthSessionResponse {
            token: session.token,
            expires_at: session.expires_at,
            user_id: session.driver_id,
            user_name: session.driver_name,
        },
    ))
}

/// `POST /auth/refresh` — mints a fresh session from the stored upstream
/// refresh token, preserving identity and entitlements.
pub(crate) async fn refresh(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = SecretString::from(auth.sensitive.refresh_token.clone());
    let session = state
        .auth
        .handle_refresh(
            auth.claims.ir_uid,
            &auth.claims.ir_name,
            &auth.claims.ent,
            &refresh_token,
        )
        .await?;
    Ok(envelope(
        &correlation,
        AuthSessionResponse {
            token: session.token,
            expires_at: session.expires_at,
            user_id: session.driver_id,
            user_name: session.driver_name,
        },
    ))
}
