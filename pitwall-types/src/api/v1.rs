//! # v1 API types
//!
//! Data transfer objects for the version 1 REST API.
//!
//! This module defines the request and response payloads exchanged between
//! the web client and the backend, along with the common success/error
//! envelopes. Field renames pin the wire names; they are part of the API
//! contract and must not change.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DriverId, RaceId, SubsessionId};

/// The common success envelope: `{response, correlationId}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// The endpoint-specific response body.
    pub response: T,
    /// Correlation id of the request, for support lookups.
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

/// The common error envelope.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Correlation id of the request.
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    /// General error strings (400 responses).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Per-field validation errors (400 responses).
    #[serde(
        rename = "fieldErrors",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub field_errors: Vec<FieldError>,
    /// Human-readable message (500 responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A single field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Body of `POST /auth/ir/callback`.
///
/// Fields are optional at the serde level so the edge can answer missing
/// fields with proper field errors instead of a deserialize rejection.
#[derive(Debug, Default, Deserialize)]
pub struct AuthCallbackRequest {
    /// The authorization code from the upstream redirect.
    #[serde(default)]
    pub code: Option<String>,
    /// The PKCE code verifier matching the original challenge.
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// The redirect URI the code was issued for.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Response of the auth endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSessionResponse {
    /// The freshly minted session token.
    pub token: String,
    /// Expiry of the session token.
    pub expires_at: DateTime<Utc>,
    /// Driver id of the authenticated user.
    pub user_id: DriverId,
    /// Display name of the authenticated user.
    pub user_name: String,
}

/// Body of `POST /ingestion/race`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IngestionRequest {
    /// Connection the worker should stream progress to. Required; validated
    /// at the edge.
    #[serde(rename = "notifyConnectionId", default)]
    pub notify_connection_id: Option<String>,
}

/// `202` response of `POST /ingestion/race`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestionQueuedResponse {
    /// Always `"queued"`.
    pub status: String,
}

/// A dimension sessions can be grouped by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Group by series id.
    Series,
    /// Group by car id.
    Car,
    /// Group by track id.
    Track,
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "series" => Ok(Dimension::Series),
            "car" => Ok(Dimension::Car),
            "track" => Ok(Dimension::Track),
            other => Err(format!("unknown dimension: {other}")),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Series => f.write_str("series"),
            Dimension::Car => f.write_str("car"),
            Dimension::Track => f.write_str("track"),
        }
    }
}

/// Time-bucket granularity for analytics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// `YYYY-MM-DD` buckets.
    Day,
    /// `YYYY-Www` ISO-week buckets.
    Week,
    /// `YYYY-MM` buckets.
    Month,
    /// `YYYY` buckets.
    Year,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// Aggregate summary over a set of sessions.
///
/// Positions are 0-based as stored; the podium/top-5/win thresholds below
/// already account for that (finish ≤ 2, ≤ 4, == 0 respectively). iRating
/// and CPI losses are stored as positive magnitudes, so
/// `gain - loss == delta` holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Number of sessions summarized.
    pub race_count: usize,
    /// iRating before the chronologically earliest session.
    pub i_rating_start: i32,
    /// iRating after the chronologically latest session.
    pub i_rating_end: i32,
    /// `end - start`.
    pub i_rating_delta: i32,
    /// Sum of positive per-session iRating changes.
    pub i_rating_gain: i32,
    /// Sum of negative per-session iRating changes, as a positive magnitude.
    pub i_rating_loss: i32,
    /// CPI before the earliest session.
    pub cpi_start: f64,
    /// CPI after the latest session.
    pub cpi_end: f64,
    /// `end - start`.
    pub cpi_delta: f64,
    /// Sum of positive per-session CPI changes.
    pub cpi_gain: f64,
    /// Sum of negative per-session CPI changes, as a positive magnitude.
    pub cpi_loss: f64,
    /// Finishes within the first three places.
    pub podiums: usize,
    /// Finishes within the first five places.
    pub top5: usize,
    /// First-place finishes.
    pub wins: usize,
    /// Average 0-based starting position.
    pub avg_start: f64,
    /// Average 0-based finishing position.
    pub avg_finish: f64,
    /// Average positions gained per session (`start - finish`).
    pub positions_gained: f64,
    /// Total incidents over the set.
    pub total_incidents: i64,
    /// Average incidents per session.
    pub avg_incidents: f64,
}

/// A grouped analytics row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRow {
    /// The grouping key; only the selected dimensions are present.
    pub key: GroupKey,
    /// Summary over the group's sessions.
    pub summary: SessionSummary,
}

/// The key of a [`GroupRow`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    /// Series id, when grouping by series.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<i64>,
    /// Car id, when grouping by car.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car_id: Option<i64>,
    /// Track id, when grouping by track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

/// A time-bucketed analytics row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRow {
    /// The bucket label, e.g. `2024-W03`.
    pub period: String,
    /// Summary over the bucket's sessions.
    pub summary: SessionSummary,
}

/// Response of `GET /drivers/{driver_id}/analytics`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    /// Summary over every session matching the filters.
    pub summary: SessionSummary,
    /// Present when `group_by` was requested; sorted by race count descending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupRow>>,
    /// Present when `granularity` was requested; sorted by period ascending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<BucketRow>>,
}

/// Response of `GET /drivers/{driver_id}/analytics/dimensions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DimensionsResponse {
    /// Distinct series ids, strictly ascending.
    #[serde(rename = "seriesIDs")]
    pub series_ids: Vec<i64>,
    /// Distinct car ids, strictly ascending.
    #[serde(rename = "carIDs")]
    pub car_ids: Vec<i64>,
    /// Distinct track ids, strictly ascending.
    #[serde(rename = "trackIDs")]
    pub track_ids: Vec<i64>,
}

/// Body of `PUT /drivers/{driver_id}/journal/{race_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveJournalRequest {
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Tags; `prefix:value` tags with known prefixes are validated.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A journal entry joined with its race context.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryView {
    /// Encodes the start time of the session the entry refers to.
    pub race_id: RaceId,
    /// Free-form notes.
    pub notes: String,
    /// Tags on the entry.
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// The joined race, absent when no matching session is stored.
    pub race: Option<RaceContext>,
}

/// The race context joined onto a journal entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceContext {
    /// Session start time.
    pub start_time: DateTime<Utc>,
    /// Upstream subsession id.
    pub subsession_id: SubsessionId,
    /// Upstream series id.
    pub series_id: i64,
    /// Upstream car id.
    pub car_id: i64,
    /// Upstream track id.
    pub track_id: i64,
    /// 0-based finishing position.
    pub finish_position: i32,
    /// iRating change over the session.
    pub i_rating_change: i32,
}
