//! Driver and driver-session entities persisted by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DriverId, SubsessionId};

/// A driver known to the system.
///
/// Created on the first successful OAuth callback and mutated on subsequent
/// logins and ingestion lock transitions. Never destroyed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    /// Upstream driver id (primary key).
    pub driver_id: DriverId,
    /// Display name as reported by the upstream user-info endpoint.
    pub driver_name: String,
    /// Timestamp of the first login.
    pub first_login: DateTime<Utc>,
    /// Timestamp of the most recent login.
    pub last_login: DateTime<Utc>,
    /// Number of completed logins.
    pub login_count: i64,
    /// While set and in the future, ingestion for this driver is locked.
    pub ingestion_blocked_until: Option<DateTime<Utc>>,
    /// Entitlement strings granted to the driver, sorted and unique.
    pub entitlements: Vec<String>,
}

impl Driver {
    /// Returns `true` iff the ingestion lock is currently active.
    pub fn ingestion_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.ingestion_blocked_until.is_some_and(|until| until > now)
    }
}

/// A single stored race for a driver.
///
/// Primary key is `(driver_id, start_time)`; `(driver_id, subsession_id)` is
/// unique as well. Rows are inserted by the ingestion engine and never
/// mutated or deleted afterwards. Positions are 0-based throughout
/// (0 = first place), matching the upstream convention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverSession {
    /// Driver this session belongs to.
    pub driver_id: DriverId,
    /// Upstream-authoritative session start time.
    pub start_time: DateTime<Utc>,
    /// Upstream series id.
    pub series_id: i64,
    /// Upstream car id.
    pub car_id: i64,
    /// Upstream track id.
    pub track_id: i64,
    /// Upstream subsession id.
    pub subsession_id: SubsessionId,
    /// iRating before the session.
    pub old_irating: i32,
    /// iRating after the session.
    pub new_irating: i32,
    /// Corners-per-incident safety score before the session.
    pub old_cpi: f64,
    /// Corners-per-incident safety score after the session.
    pub new_cpi: f64,
    /// Starting position, 0-based.
    pub start_position: i32,
    /// Finishing position, 0-based.
    pub finish_position: i32,
    /// Incident count for the session.
    pub incidents: i32,
    /// Lap-scoped details, when lap data was available upstream.
    pub lap_details: Option<LapDetails>,
}

/// Per-driver lap details for a session.
///
/// Lap times are in the upstream unit: integer 1/10,000ths of a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapDetails {
    /// Average lap time, if the driver completed any timed laps.
    pub average_lap_time: Option<i64>,
    /// Best lap time, if the driver completed any timed laps.
    pub best_lap_time: Option<i64>,
    /// Number of completed laps.
    pub laps_complete: i32,
    /// Number of laps led.
    pub laps_led: i32,
}
