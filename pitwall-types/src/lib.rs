#![deny(missing_docs)]
//! Core type definitions for the pitwall backend.
//!
//! This crate groups together the strongly-typed values and message
//! structures used across the system. It provides:
//!
//! * Thin wrappers around primitive identifiers such as driver ids,
//!   subsession ids, and race ids, with consistent serialization and
//!   display implementations.
//! * Domain entities persisted by the record store (see [`driver`] and
//!   [`journal`] modules).
//! * Session claim types carried inside the bearer token (see [`claims`]).
//! * WebSocket envelope and payload types (see [`ws`]).
//! * Queue event types exchanged between the REST edge and the ingestion
//!   worker (see [`events`]).
//! * REST API request/response types (see [`api`] module).
//!
//! Use these types to pass, store, and (de)serialize identifiers in a
//! type-safe way throughout your application.

use std::fmt;

use chrono::{DateTime, TimeZone as _, Utc};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod claims;
pub mod driver;
pub mod events;
pub mod journal;
pub mod ws;

/// The id of a driver on the upstream platform.
///
/// Always a positive integer; the upstream assigns them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct DriverId(i64);

/// The id of a single upstream race instance (the unit of ingestion).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SubsessionId(i64);

/// A stable encoding of a session's start time used as the journal key.
///
/// The encoding is the unix timestamp in seconds, which is lossless for
/// upstream start times (they carry second precision).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RaceId(i64);

/// The id of a live WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl DriverId {
    /// Creates a new `DriverId` by wrapping an `i64`.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Converts the driver id to an `i64`.
    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl SubsessionId {
    /// Creates a new `SubsessionId` by wrapping an `i64`.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Converts the subsession id to an `i64`.
    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl RaceId {
    /// Creates a new `RaceId` by wrapping a raw unix timestamp in seconds.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Encodes a session start time as a `RaceId`.
    pub fn from_start_time(start_time: DateTime<Utc>) -> Self {
        Self(start_time.timestamp())
    }

    /// Decodes the race id back into the session start time.
    ///
    /// Returns `None` if the stored value is outside the representable
    /// timestamp range.
    pub fn start_time(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.0, 0).single()
    }

    /// Converts the race id to an `i64`.
    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl ConnectionId {
    /// Creates a new `ConnectionId` by wrapping a `String`.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random connection id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the connection id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for DriverId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<i64> for SubsessionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for SubsessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn race_id_round_trips_start_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let race_id = RaceId::from_start_time(start);
        assert_eq!(race_id.start_time(), Some(start));
    }
}
