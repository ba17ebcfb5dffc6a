//! Wire types of the upstream data API.
//!
//! Lap time values are integer 1/10,000ths of a second and positions are
//! 0-indexed (0 = first place); both conventions are preserved as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pitwall_types::{DriverId, SubsessionId};

/// Response of the OAuth token endpoint, for both the authorization-code
/// exchange and the refresh grant.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The upstream access token.
    pub access_token: String,
    /// The upstream refresh token.
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Response of the user-info endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct UserInfo {
    /// The driver id of the authenticated user.
    pub cust_id: DriverId,
    /// The driver's display name.
    pub display_name: String,
}

/// A candidate race returned by the series search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaceCandidate {
    /// Upstream subsession id.
    pub subsession_id: SubsessionId,
    /// Session start time.
    pub start_time: DateTime<Utc>,
    /// Upstream series id.
    pub series_id: i64,
    /// Upstream car id the driver entered with.
    pub car_id: i64,
    /// The track the subsession ran on.
    pub track: TrackRef,
}

/// Reference to a track inside search/result payloads.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrackRef {
    /// Upstream track id.
    pub track_id: i64,
}

/// Full result of a single subsession.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubsessionResult {
    /// Upstream subsession id.
    pub subsession_id: SubsessionId,
    /// Session start time.
    pub start_time: DateTime<Utc>,
    /// Upstream series id.
    pub series_id: i64,
    /// The track the subsession ran on.
    pub track: TrackRef,
    /// Per-simsession result blocks (practice, qualifying, race).
    pub session_results: Vec<SimsessionResults>,
}

/// Results of one simsession within a subsession.
///
/// The race simsession carries number 0; practice and qualifying use
/// negative numbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimsessionResults {
    /// The simsession number.
    pub simsession_number: i32,
    /// Per-driver rows.
    pub results: Vec<DriverResult>,
}

/// A single driver's row within a simsession result block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverResult {
    /// The driver.
    pub cust_id: DriverId,
    /// Car the driver entered with.
    pub car_id: i64,
    /// Starting position, 0-based.
    pub starting_position: i32,
    /// Finishing position, 0-based.
    pub finish_position: i32,
    /// iRating before the session.
    pub oldi_rating: i32,
    /// iRating after the session.
    pub newi_rating: i32,
    /// CPI before the session.
    pub old_cpi: f64,
    /// CPI after the session.
    pub new_cpi: f64,
    /// Incident count.
    pub incidents: i32,
}

impl SubsessionResult {
    /// Returns the race simsession block, if present.
    pub fn race_session(&self) -> Option<&SimsessionResults> {
        self.session_results
            .iter()
            .find(|s| s.simsession_number == 0)
    }

    /// Returns the given driver's row in the race simsession, if present.
    pub fn driver_race_result(&self, driver_id: DriverId) -> Option<&DriverResult> {
        self.race_session()?
            .results
            .iter()
            .find(|r| r.cust_id == driver_id)
    }
}

/// Per-driver lap data for one subsession.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LapData {
    /// Completed laps.
    pub laps_complete: i32,
    /// Laps led.
    pub laps_led: i32,
    /// Average lap time over timed laps, if any.
    pub average_lap_time: Option<i64>,
    /// Best lap time, if any timed lap was set.
    pub best_lap_time: Option<i64>,
}

/// A car definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Car {
    /// Upstream car id.
    pub car_id: i64,
    /// Full car name.
    pub car_name: String,
    /// Abbreviated car name.
    #[serde(default)]
    pub car_name_abbreviated: Option<String>,
}

/// A track definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// Upstream track id.
    pub track_id: i64,
    /// Track name.
    pub track_name: String,
    /// Layout/configuration name, when the track has several.
    #[serde(default)]
    pub config_name: Option<String>,
}

/// A series definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Series {
    /// Upstream series id.
    pub series_id: i64,
    /// Series name.
    pub series_name: String,
    /// License category of the series.
    #[serde(default)]
    pub category: Option<String>,
}
