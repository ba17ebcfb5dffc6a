#![deny(missing_docs)]
//! Authenticated client for the upstream iRacing data and OAuth APIs.
//!
//! All access goes through the [`IracingApi`] trait so that consumers (the
//! auth service, the ingestion engine, the content endpoints) can be wired
//! against a fake in tests. The production implementation is
//! [`IracingClient`], a thin `reqwest` wrapper that handles the upstream's
//! two response shapes:
//!
//! * a direct JSON body, or
//! * an indirection envelope `{"link": ...}` pointing at a signed blob URL,
//!   which is fetched in a second hop.
//!
//! A rejected access token on either hop surfaces as the
//! [`UpstreamError::Unauthorized`] sentinel. After every upstream response
//! the remaining-quota header (when present) is published as the
//! [`METRICS_ID_RATELIMIT_REMAINING`] gauge, labelled with the endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

mod client;
mod error;
pub mod types;

pub use client::{IracingClient, IracingClientConfig};
pub use error::UpstreamError;

use pitwall_types::{DriverId, SubsessionId};
use types::{
    Car, LapData, RaceCandidate, Series, SubsessionResult, TokenResponse, Track, UserInfo,
};

/// Metrics key for the upstream's advertised remaining rate-limit quota.
///
/// Published as a gauge with an `endpoint` label after every upstream call
/// whose response carries the remaining-quota header.
pub const METRICS_ID_RATELIMIT_REMAINING: &str = "iracing_ratelimit_remaining";

/// Dynamic trait object for the upstream client.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type IracingService = Arc<dyn IracingApi + Send + Sync>;

/// The upstream API surface the backend depends on.
#[async_trait]
pub trait IracingApi {
    /// Exchanges an authorization code (+ PKCE verifier) for tokens.
    async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, UpstreamError>;

    /// Exchanges a refresh token for a fresh token pair.
    async fn refresh_token(&self, refresh_token: &SecretString)
    -> Result<TokenResponse, UpstreamError>;

    /// Fetches the authenticated user's identity.
    async fn user_info(&self, access_token: &SecretString) -> Result<UserInfo, UpstreamError>;

    /// Searches the driver's official races with start time in `[from, to)`.
    ///
    /// The window bounds are enforced client-side as well, which is a no-op
    /// when the upstream already honors them.
    async fn search_series(
        &self,
        access_token: &SecretString,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RaceCandidate>, UpstreamError>;

    /// Fetches the full result of a single subsession.
    async fn subsession_result(
        &self,
        access_token: &SecretString,
        subsession_id: SubsessionId,
    ) -> Result<SubsessionResult, UpstreamError>;

    /// Fetches per-driver lap data for a subsession.
    ///
    /// Lap data is optional upstream; a 404-class response maps to `None`.
    async fn lap_data(
        &self,
        access_token: &SecretString,
        subsession_id: SubsessionId,
        simsession_number: i32,
        driver_id: DriverId,
    ) -> Result<Option<LapData>, UpstreamError>;

    /// Fetches the car catalogue.
    async fn cars(&self, access_token: &SecretString) -> Result<Vec<Car>, UpstreamError>;

    /// Fetches the car asset map (images, logos).
    async fn car_assets(
        &self,
        access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError>;

    /// Fetches the track catalogue.
    async fn tracks(&self, access_token: &SecretString) -> Result<Vec<Track>, UpstreamError>;

    /// Fetches the track asset map.
    async fn track_assets(
        &self,
        access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError>;

    /// Fetches the series catalogue.
    async fn series(&self, access_token: &SecretString) -> Result<Vec<Series>, UpstreamError>;

    /// Fetches an arbitrary document path from the data API.
    async fn fetch_doc(
        &self,
        access_token: &SecretString,
        path: &str,
    ) -> Result<serde_json::Value, UpstreamError>;
}
