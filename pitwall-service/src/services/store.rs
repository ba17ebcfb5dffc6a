//! Record store interface for the pitwall backend.
//!
//! This module defines the [`RecordStore`] trait, which owns every on-disk
//! representation: drivers, driver sessions, journal entries, websocket
//! connection records, and the per-driver ingestion lock.
//!
//! Current `RecordStore` implementations:
//! - Postgres (production)
//! - Memory (dev environment and tests)
//!
//! Failure semantics: storage errors surface as infrastructure errors
//! (retryable at caller discretion); a missing row is `None`, never an
//! error. Batch reads preserve request order and map misses to `None`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pitwall_types::{
    ConnectionId, DriverId, RaceId, SubsessionId,
    driver::{Driver, DriverSession},
    journal::JournalEntry,
    ws::WsConnection,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Dynamic trait object for the record store.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type RecordStoreService = Arc<dyn RecordStore + Send + Sync>;

/// Trait that implementations of record stores must provide.
#[async_trait]
pub trait RecordStore {
    /// Loads a driver. `None` when unknown.
    async fn get_driver(&self, driver_id: DriverId) -> eyre::Result<Option<Driver>>;

    /// Inserts a new driver record.
    async fn insert_driver(&self, driver: &Driver) -> eyre::Result<()>;

    /// Records a login: increments the login count and updates `last_login`.
    async fn record_login(&self, driver_id: DriverId, at: DateTime<Utc>) -> eyre::Result<()>;

    /// Persists a driver session.
    ///
    /// Idempotent on the `(driver_id, start_time)` key (and on the unique
    /// `(driver_id, subsession_id)` pair): inserting an existing key is a
    /// no-op. Returns `true` iff a new row was written.
    async fn save_driver_session(&self, session: &DriverSession) -> eyre::Result<bool>;

    /// Loads a single session by primary key. `None` when absent.
    async fn get_driver_session(
        &self,
        driver_id: DriverId,
        start_time: DateTime<Utc>,
    ) -> eyre::Result<Option<DriverSession>>;

    /// Batch-loads sessions by subsession id.
    ///
    /// The result has the same length and order as `subsession_ids`;
    /// missing keys map to `None`.
    async fn get_driver_sessions_by_subsessions(
        &self,
        driver_id: DriverId,
        subsession_ids: &[SubsessionId],
    ) -> eyre::Result<Vec<Option<DriverSession>>>;

    /// Loads sessions with `start_time` in `[from, to)`, ascending by
    /// `start_time`.
    async fn get_driver_sessions_by_time_range(
        &self,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> eyre::Result<Vec<DriverSession>>;

    /// Inserts or replaces a journal entry.
    async fn save_journal_entry(&self, entry: &JournalEntry) -> eyre::Result<()>;

    /// Loads a journal entry. `None` when absent.
    async fn get_journal_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> eyre::Result<Option<JournalEntry>>;

    /// Lists a driver's journal entries, newest race first.
    async fn list_journal_entries(&self, driver_id: DriverId) -> eyre::Result<Vec<JournalEntry>>;

    /// Deletes a journal entry. Deleting a missing entry is a no-op.
    async fn delete_journal_entry(&self, driver_id: DriverId, race_id: RaceId)
    -> eyre::Result<()>;

    /// Inserts or replaces a websocket connection record.
    async fn save_connection(&self, connection: &WsConnection) -> eyre::Result<()>;

    /// Lists the connection records of a driver.
    async fn get_connections_by_driver(
        &self,
        driver_id: DriverId,
    ) -> eyre::Result<Vec<WsConnection>>;

    /// Deletes a connection record. Deleting a missing record is a no-op.
    async fn delete_connection(
        &self,
        driver_id: DriverId,
        connection_id: &ConnectionId,
    ) -> eyre::Result<()>;

    /// Attempts to acquire the per-driver ingestion lock for `duration`.
    ///
    /// One atomic conditional write: succeeds iff no lock is set or the
    /// existing lock has expired, and then sets `ingestion_blocked_until =
    /// now + duration`. Returns the acquired-flag; `false` means an active
    /// lock is held elsewhere.
    async fn acquire_ingestion_lock(
        &self,
        driver_id: DriverId,
        duration: Duration,
    ) -> eyre::Result<bool>;

    /// Clears the per-driver ingestion lock unconditionally.
    async fn release_ingestion_lock(&self, driver_id: DriverId) -> eyre::Result<()>;
}
