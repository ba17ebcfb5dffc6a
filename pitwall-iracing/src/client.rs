//! `reqwest`-based implementation of [`IracingApi`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{StatusCode, header::HeaderMap};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use tracing::instrument;

use pitwall_types::{DriverId, SubsessionId};

use crate::{
    IracingApi, METRICS_ID_RATELIMIT_REMAINING, UpstreamError,
    types::{
        Car, LapData, RaceCandidate, Series, SubsessionResult, TokenResponse, Track, UserInfo,
    },
};

/// How much of an upstream error body is kept in the error.
const MAX_ERROR_BODY_LEN: usize = 2048;

/// Configuration of the [`IracingClient`].
#[derive(Clone, Debug)]
pub struct IracingClientConfig {
    /// Base URL of the data API, without trailing slash.
    pub data_base_url: String,
    /// Base URL of the OAuth endpoints, without trailing slash.
    pub oauth_base_url: String,
    /// The OAuth client id of this backend.
    pub client_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// The production upstream client.
#[derive(Clone, Debug)]
pub struct IracingClient {
    http: reqwest::Client,
    config: IracingClientConfig,
}

impl IracingClient {
    /// Creates a client with its own connection pool.
    pub fn new(config: IracingClientConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Performs an authenticated GET against the data API, following the
    /// link envelope when the upstream returns one.
    async fn get_data<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
        access_token: &SecretString,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.config.data_base_url, path);
        tracing::trace!("GET {url}");
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .query(query)
            .send()
            .await?;
        observe_rate_limit(endpoint, response.headers());
        let response = check_status(response).await?;
        let body: serde_json::Value = response.json().await?;

        // The upstream either answers inline or hands out a signed blob URL.
        let value = match body.get("link").and_then(|l| l.as_str()) {
            Some(link) => self.fetch_blob(endpoint, link).await?,
            None => body,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches the signed blob a link envelope points at.
    ///
    /// The blob URL is pre-signed; no auth header is attached. A token
    /// rejection here still maps to the unauthorized sentinel.
    async fn fetch_blob(
        &self,
        endpoint: &'static str,
        link: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        tracing::trace!("following link envelope for {endpoint}");
        let response = self.http.get(link).send().await?;
        observe_rate_limit(endpoint, response.headers());
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Posts a form to the OAuth token endpoint.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, UpstreamError> {
        let url = format!("{}/token", self.config.oauth_base_url);
        let response = self.http.post(&url).form(form).send().await?;
        observe_rate_limit("oauth_token", response.headers());
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IracingApi for IracingClient {
    #[instrument(level = "debug", skip_all)]
    async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, UpstreamError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn refresh_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, UpstreamError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.config.client_id),
            ("refresh_token", refresh_token.expose_secret()),
        ])
        .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn user_info(&self, access_token: &SecretString) -> Result<UserInfo, UpstreamError> {
        let url = format!("{}/userinfo", self.config.oauth_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;
        observe_rate_limit("userinfo", response.headers());
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    #[instrument(level = "debug", skip_all, fields(%driver_id))]
    async fn search_series(
        &self,
        access_token: &SecretString,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RaceCandidate>, UpstreamError> {
        let candidates: Vec<RaceCandidate> = self
            .get_data(
                "search_series",
                "/data/results/search_series",
                &[
                    ("cust_id", driver_id.to_string()),
                    (
                        "start_range_begin",
                        from.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    (
                        "start_range_end",
                        to.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                ],
                access_token,
            )
            .await?;
        // enforce the window locally too; a no-op when upstream honors it
        Ok(candidates
            .into_iter()
            .filter(|c| c.start_time >= from && c.start_time < to)
            .collect())
    }

    #[instrument(level = "debug", skip_all, fields(%subsession_id))]
    async fn subsession_result(
        &self,
        access_token: &SecretString,
        subsession_id: SubsessionId,
    ) -> Result<SubsessionResult, UpstreamError> {
        self.get_data(
            "subsession_result",
            "/data/results/get",
            &[("subsession_id", subsession_id.to_string())],
            access_token,
        )
        .await
    }

    #[instrument(level = "debug", skip_all, fields(%subsession_id, %driver_id))]
    async fn lap_data(
        &self,
        access_token: &SecretString,
        subsession_id: SubsessionId,
        simsession_number: i32,
        driver_id: DriverId,
    ) -> Result<Option<LapData>, UpstreamError> {
        let result = self
            .get_data(
                "lap_data",
                "/data/results/lap_data",
                &[
                    ("subsession_id", subsession_id.to_string()),
                    ("simsession_number", simsession_number.to_string()),
                    ("cust_id", driver_id.to_string()),
                ],
                access_token,
            )
            .await;
        match result {
            Ok(lap_data) => Ok(Some(lap_data)),
            // lap data is optional upstream
            Err(UpstreamError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn cars(&self, access_token: &SecretString) -> Result<Vec<Car>, UpstreamError> {
        self.get_data("cars", "/data/car/get", &[], access_token)
            .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn car_assets(
        &self,
        access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.get_data("car_assets", "/data/car/assets", &[], access_token)
            .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn tracks(&self, access_token: &SecretString) -> Result<Vec<Track>, UpstreamError> {
        self.get_data("tracks", "/data/track/get", &[], access_token)
            .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn track_assets(
        &self,
        access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.get_data("track_assets", "/data/track/assets", &[], access_token)
            .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn series(&self, access_token: &SecretString) -> Result<Vec<Series>, UpstreamError> {
        self.get_data("series", "/data/series/get", &[], access_token)
            .await
    }

    #[instrument(level = "debug", skip_all, fields(%path))]
    async fn fetch_doc(
        &self,
        access_token: &SecretString,
        path: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.get_data("fetch_doc", path, &[], access_token).await
    }
}

/// Maps non-2xx statuses onto the upstream error taxonomy.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(UpstreamError::Unauthorized);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(UpstreamError::RateLimited);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut end = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Publishes the remaining-quota header as a gauge, when advertised.
fn observe_rate_limit(endpoint: &'static str, headers: &HeaderMap) {
    if let Some(remaining) = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
    {
        ::metrics::gauge!(METRICS_ID_RATELIMIT_REMAINING, "endpoint" => endpoint).set(remaining);
    }
}
