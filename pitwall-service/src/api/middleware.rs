//! Request-scoped context and the auth/ownership middleware.
//!
//! Cross-cutting values (correlation id, session claims) live in request
//! extensions — an explicit request-scoped bag with typed accessors, never
//! thread-locals. The correlation middleware populates the bag and renders
//! error envelopes; the auth middleware validates the bearer token and
//! stores the [`AuthContext`]; the ownership middleware compares the path
//! driver id against the session.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, Method, header};
use serde::Deserialize;
use uuid::Uuid;

use pitwall_types::{
    DriverId,
    api::{CORRELATION_ID_HEADER, v1::ApiErrorBody},
    claims::{SensitiveClaims, SessionClaims},
};

use crate::{
    AppState,
    api::errors::{ApiError, ErrorDetails},
};

/// The per-request correlation id.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// The validated session attached to authenticated requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Non-sensitive session claims.
    pub claims: SessionClaims,
    /// Decrypted upstream credentials.
    pub sensitive: SensitiveClaims,
}

impl AuthContext {
    /// The driver the session belongs to.
    pub fn driver_id(&self) -> DriverId {
        self.claims.ir_uid
    }
}

/// Generates the correlation id, echoes it as a response header, and
/// renders pending error bodies into the common error envelope.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    if let Some(details) = response.extensions_mut().remove::<ErrorDetails>() {
        response = render_error(response, details, &correlation_id);
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id.0) {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn render_error(
    response: Response,
    details: ErrorDetails,
    correlation_id: &CorrelationId,
) -> Response {
    let (mut parts, _) = response.into_parts();
    let body = ApiErrorBody {
        correlation_id: correlation_id.0.clone(),
        errors: details.errors,
        field_errors: details.field_errors,
        message: details.message,
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(bytes))
}

/// Validates the bearer token and attaches the [`AuthContext`].
///
/// `OPTIONS` requests bypass auth so CORS preflights work unauthenticated.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    let Some(token) = bearer_token(&request) else {
        return ApiError::Unauthorized.into_response();
    };
    match state.tokens.validate_token(&token).await {
        Ok(session) => {
            request.extensions_mut().insert(AuthContext {
                claims: session.claims,
                sensitive: session.sensitive,
            });
            next.run(request).await
        }
        Err(_) => ApiError::Unauthorized.into_response(),
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

#[derive(Deserialize)]
pub(crate) struct DriverPathParams {
    driver_id: i64,
}

/// Enforces `path.driver_id == session.driver_id` on the driver-scoped
/// subtree.
pub async fn require_driver_ownership(
    Path(params): Path<DriverPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>() else {
        return ApiError::Unauthorized.into_response();
    };
    if auth.driver_id().into_inner() != params.driver_id {
        return ApiError::Forbidden.into_response();
    }
    next.run(request).await
}
