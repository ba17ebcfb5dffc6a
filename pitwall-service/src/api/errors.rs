//! API error types and their response mapping.
//!
//! Handlers return [`ApiError`]; `IntoResponse` maps each kind to its
//! status code and attaches the body parts as a response extension. The
//! correlation middleware (see [`crate::api::middleware`]) renders the
//! final JSON envelope so every error body carries the request's
//! correlation id.

use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use pitwall_iracing::UpstreamError;

use pitwall_types::api::v1::FieldError;

use crate::services::{auth::AuthError, journal::JournalError, token::TokenError};

/// All errors an API handler may answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad body or parameter; answered with field errors.
    #[error("invalid input")]
    InvalidInput {
        /// General input errors.
        errors: Vec<String>,
        /// Per-field errors.
        field_errors: Vec<FieldError>,
    },
    /// Missing or invalid session token.
    #[error("unauthorized")]
    Unauthorized,
    /// Ownership or entitlement check failed.
    #[error("forbidden")]
    Forbidden,
    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The per-driver ingestion lock is active.
    #[error("ingestion already running")]
    Busy {
        /// Seconds until the lock expires, at least 1.
        retry_after_secs: u64,
    },
    /// An upstream call failed. The unauthorized sentinel maps to a 401
    /// carrying a re-auth hint; everything else is a 500.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Storage or other internal failure.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

/// The body parts of an error response, picked up by the correlation
/// middleware to render the final envelope.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorDetails {
    pub(crate) errors: Vec<String>,
    pub(crate) field_errors: Vec<FieldError>,
    pub(crate) message: Option<String>,
}

impl ApiError {
    /// A single missing-field error.
    pub fn missing_field(field: &str) -> Self {
        ApiError::InvalidInput {
            errors: vec![],
            field_errors: vec![FieldError {
                field: field.to_owned(),
                message: "is required".to_owned(),
            }],
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(err) if err.is_unauthorized() => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;
        let details = match self {
            ApiError::InvalidInput {
                errors,
                field_errors,
            } => ErrorDetails {
                errors,
                field_errors,
                message: None,
            },
            ApiError::Unauthorized => ErrorDetails {
                errors: vec!["missing or invalid authorization".to_owned()],
                ..ErrorDetails::default()
            },
            ApiError::Forbidden => ErrorDetails {
                errors: vec!["not allowed for this driver".to_owned()],
                ..ErrorDetails::default()
            },
            ApiError::NotFound(what) => ErrorDetails {
                errors: vec![format!("{what} not found")],
                ..ErrorDetails::default()
            },
            ApiError::Busy { retry_after_secs } => {
                retry_after = Some(retry_after_secs);
                ErrorDetails {
                    errors: vec!["ingestion already running for this driver".to_owned()],
                    ..ErrorDetails::default()
                }
            }
            ApiError::Upstream(err) if err.is_unauthorized() => ErrorDetails {
                errors: vec![
                    "upstream authorization rejected, re-authentication required".to_owned(),
                ],
                ..ErrorDetails::default()
            },
            ApiError::Upstream(err) => {
                tracing::error!("upstream failure: {err}");
                ErrorDetails {
                    message: Some("upstream request failed".to_owned()),
                    ..ErrorDetails::default()
                }
            }
            ApiError::Internal(err) => {
                tracing::error!("internal error: {err:?}");
                ErrorDetails {
                    message: Some("internal error".to_owned()),
                    ..ErrorDetails::default()
                }
            }
        };
        let mut response = status.into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response.extensions_mut().insert(details);
        response
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        // one opaque kind by design; no sub-reason reaches the client
        match err {
            TokenError::Invalid => ApiError::Unauthorized,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Upstream(upstream) => ApiError::Upstream(upstream),
            AuthError::Internal(internal) => ApiError::Internal(internal),
        }
    }
}

impl From<JournalError> for ApiError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::InvalidTag { .. } => ApiError::InvalidInput {
                errors: vec![err.to_string()],
                field_errors: vec![],
            },
            JournalError::Storage(storage) => ApiError::Internal(storage),
        }
    }
}
