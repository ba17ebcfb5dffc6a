//! Error taxonomy for upstream calls.
//!
//! [`UpstreamError::Unauthorized`] is a sentinel: it must survive every
//! wrapping layer so callers can match on it (via [`UpstreamError::is_unauthorized`])
//! and trigger re-authentication instead of retrying.

/// All errors an upstream call may produce.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream rejected the provided access token, on the primary
    /// request or on the signed-blob fetch.
    #[error("upstream rejected the access token")]
    Unauthorized,
    /// The upstream signalled that the rate limit is exhausted.
    #[error("upstream rate limit exhausted")]
    RateLimited,
    /// Any other non-2xx upstream response.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// A fragment of the response body (truncated).
        body: String,
    },
    /// The upstream could not be reached at the transport level.
    #[error("could not reach upstream: {0}")]
    Transport(#[from] reqwest::Error),
    /// The upstream response could not be decoded.
    #[error("could not decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Returns `true` iff this is the unauthorized sentinel.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, UpstreamError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_sentinel_is_unauthorized() {
        assert!(UpstreamError::Unauthorized.is_unauthorized());
        assert!(!UpstreamError::RateLimited.is_unauthorized());
        assert!(
            !UpstreamError::Status {
                status: 403,
                body: String::new(),
            }
            .is_unauthorized()
        );
    }
}
