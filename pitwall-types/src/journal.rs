//! Journal entities persisted by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DriverId, RaceId};

/// A driver's journal entry for a single race.
///
/// Keyed by `(driver_id, race_id)` where the race id encodes the session's
/// start time (see [`RaceId`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Driver this entry belongs to.
    pub driver_id: DriverId,
    /// Encodes the start time of the session the entry refers to.
    pub race_id: RaceId,
    /// Free-form notes.
    pub notes: String,
    /// Tags, either free-form or `prefix:value` for known prefixes.
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}
