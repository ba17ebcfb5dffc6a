//! In-memory implementation of [`RecordStore`].
//!
//! Backs the dev environment and the test suites. All state lives behind a
//! single mutex, which makes the conditional lock write trivially atomic.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use pitwall_types::{
    ConnectionId, DriverId, RaceId, SubsessionId,
    driver::{Driver, DriverSession},
    journal::JournalEntry,
    ws::WsConnection,
};

use crate::{config::Environment, services::store::RecordStore};

/// Dev/test record store holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    drivers: BTreeMap<DriverId, Driver>,
    sessions: BTreeMap<(DriverId, DateTime<Utc>), DriverSession>,
    journal: BTreeMap<(DriverId, RaceId), JournalEntry>,
    connections: BTreeMap<(DriverId, ConnectionId), WsConnection>,
}

impl MemoryRecordStore {
    /// Creates an empty store. Panics outside the dev environment.
    pub fn new(environment: Environment) -> Self {
        environment.assert_is_dev();
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_driver(&self, driver_id: DriverId) -> eyre::Result<Option<Driver>> {
        Ok(self.inner.lock().drivers.get(&driver_id).cloned())
    }

    async fn insert_driver(&self, driver: &Driver) -> eyre::Result<()> {
        // insert-if-absent, matching the postgres backend
        self.inner
            .lock()
            .drivers
            .entry(driver.driver_id)
            .or_insert_with(|| driver.clone());
        Ok(())
    }

    async fn record_login(&self, driver_id: DriverId, at: DateTime<Utc>) -> eyre::Result<()> {
        if let Some(driver) = self.inner.lock().drivers.get_mut(&driver_id) {
            driver.login_count += 1;
            driver.last_login = at;
        }
        Ok(())
    }

    async fn save_driver_session(&self, session: &DriverSession) -> eyre::Result<bool> {
        let mut inner = self.inner.lock();
        let duplicate_subsession = inner
            .sessions
            .range((session.driver_id, DateTime::<Utc>::MIN_UTC)..)
            .take_while(|((driver_id, _), _)| *driver_id == session.driver_id)
            .any(|(_, s)| s.subsession_id == session.subsession_id);
        let key = (session.driver_id, session.start_time);
        if duplicate_subsession || inner.sessions.contains_key(&key) {
            return Ok(false);
        }
        inner.sessions.insert(key, session.clone());
        Ok(true)
    }

    async fn get_driver_session(
        &self,
        driver_id: DriverId,
        start_time: DateTime<Utc>,
    ) -> eyre::Result<Option<DriverSession>> {
        Ok(self
            .inner
            .lock()
            .sessions
            .get(&(driver_id, start_time))
            .cloned())
    }

    async fn get_driver_sessions_by_subsessions(
        &self,
        driver_id: DriverId,
        subsession_ids: &[SubsessionId],
    ) -> eyre::Result<Vec<Option<DriverSession>>> {
        let inner = self.inner.lock();
        let by_subsession: BTreeMap<SubsessionId, &DriverSession> = inner
            .sessions
            .range((driver_id, DateTime::<Utc>::MIN_UTC)..)
            .take_while(|((id, _), _)| *id == driver_id)
            .map(|(_, s)| (s.subsession_id, s))
            .collect();
        Ok(subsession_ids
            .iter()
            .map(|id| by_subsession.get(id).map(|s| (*s).clone()))
            .collect())
    }

    async fn get_driver_sessions_by_time_range(
        &self,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> eyre::Result<Vec<DriverSession>> {
        Ok(self
            .inner
            .lock()
            .sessions
            .range((driver_id, from)..(driver_id, to))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn save_journal_entry(&self, entry: &JournalEntry) -> eyre::Result<()> {
        self.inner
            .lock()
            .journal
            .insert((entry.driver_id, entry.race_id), entry.clone());
        Ok(())
    }

    async fn get_journal_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> eyre::Result<Option<JournalEntry>> {
        Ok(self
            .inner
            .lock()
            .journal
            .get(&(driver_id, race_id))
            .cloned())
    }

    async fn list_journal_entries(&self, driver_id: DriverId) -> eyre::Result<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = self
            .inner
            .lock()
            .journal
            .range((driver_id, RaceId::new(i64::MIN))..=(driver_id, RaceId::new(i64::MAX)))
            .map(|(_, e)| e.clone())
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn delete_journal_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> eyre::Result<()> {
        self.inner.lock().journal.remove(&(driver_id, race_id));
        Ok(())
    }

    async fn save_connection(&self, connection: &WsConnection) -> eyre::Result<()> {
        self.inner.lock().connections.insert(
            (connection.driver_id, connection.connection_id.clone()),
            connection.clone(),
        );
        Ok(())
    }

    async fn get_connections_by_driver(
        &self,
        driver_id: DriverId,
    ) -> eyre::Result<Vec<WsConnection>> {
        Ok(self
            .inner
            .lock()
            .connections
            .range((driver_id, ConnectionId::new(""))..)
            .take_while(|((id, _), _)| *id == driver_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn delete_connection(
        &self,
        driver_id: DriverId,
        connection_id: &ConnectionId,
    ) -> eyre::Result<()> {
        self.inner
            .lock()
            .connections
            .remove(&(driver_id, connection_id.clone()));
        Ok(())
    }

    async fn acquire_ingestion_lock(
        &self,
        driver_id: DriverId,
        duration: Duration,
    ) -> eyre::Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let Some(driver) = inner.drivers.get_mut(&driver_id) else {
            return Ok(false);
        };
        if driver.ingestion_locked_at(now) {
            return Ok(false);
        }
        driver.ingestion_blocked_until = Some(now + duration);
        Ok(true)
    }

    async fn release_ingestion_lock(&self, driver_id: DriverId) -> eyre::Result<()> {
        if let Some(driver) = self.inner.lock().drivers.get_mut(&driver_id) {
            driver.ingestion_blocked_until = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_types::driver::LapDetails;

    fn driver(driver_id: i64) -> Driver {
        let now = Utc::now();
        Driver {
            driver_id: DriverId::new(driver_id),
            driver_name: format!("Driver {driver_id}"),
            first_login: now,
            last_login: now,
            login_count: 1,
            ingestion_blocked_until: None,
            entitlements: vec![],
        }
    }

    fn session(driver_id: i64, subsession_id: i64, start_offset_secs: i64) -> DriverSession {
        DriverSession {
            driver_id: DriverId::new(driver_id),
            start_time: Utc::now() + chrono::Duration::seconds(start_offset_secs),
            series_id: 1,
            car_id: 2,
            track_id: 3,
            subsession_id: SubsessionId::new(subsession_id),
            old_irating: 1500,
            new_irating: 1550,
            old_cpi: 3.0,
            new_cpi: 3.1,
            start_position: 5,
            finish_position: 2,
            incidents: 3,
            lap_details: Some(LapDetails {
                average_lap_time: Some(812345),
                best_lap_time: Some(801234),
                laps_complete: 21,
                laps_led: 0,
            }),
        }
    }

    #[tokio::test]
    async fn save_driver_session_is_idempotent() -> eyre::Result<()> {
        let store = MemoryRecordStore::new(Environment::Dev);
        let s = session(1, 100, 0);
        assert!(store.save_driver_session(&s).await?);
        assert!(!store.save_driver_session(&s).await?);
        Ok(())
    }

    #[tokio::test]
    async fn batch_read_preserves_request_order() -> eyre::Result<()> {
        let store = MemoryRecordStore::new(Environment::Dev);
        store.save_driver_session(&session(1, 100, 0)).await?;
        store.save_driver_session(&session(1, 102, 60)).await?;
        let found = store
            .get_driver_sessions_by_subsessions(
                DriverId::new(1),
                &[
                    SubsessionId::new(102),
                    SubsessionId::new(101),
                    SubsessionId::new(100),
                ],
            )
            .await?;
        assert_eq!(found.len(), 3);
        assert_eq!(
            found[0].as_ref().map(|s| s.subsession_id),
            Some(SubsessionId::new(102))
        );
        assert!(found[1].is_none());
        assert_eq!(
            found[2].as_ref().map(|s| s.subsession_id),
            Some(SubsessionId::new(100))
        );
        Ok(())
    }

    #[tokio::test]
    async fn lock_is_single_flight_until_released() -> eyre::Result<()> {
        let store = MemoryRecordStore::new(Environment::Dev);
        let id = DriverId::new(7);
        store.insert_driver(&driver(7)).await?;
        assert!(
            store
                .acquire_ingestion_lock(id, Duration::from_secs(60))
                .await?
        );
        assert!(
            !store
                .acquire_ingestion_lock(id, Duration::from_secs(60))
                .await?
        );
        store.release_ingestion_lock(id).await?;
        assert!(
            store
                .acquire_ingestion_lock(id, Duration::from_secs(60))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() -> eyre::Result<()> {
        let store = MemoryRecordStore::new(Environment::Dev);
        let id = DriverId::new(7);
        let mut d = driver(7);
        d.ingestion_blocked_until = Some(Utc::now() - chrono::Duration::seconds(1));
        store.insert_driver(&d).await?;
        assert!(
            store
                .acquire_ingestion_lock(id, Duration::from_secs(60))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn time_range_is_half_open_and_ascending() -> eyre::Result<()> {
        let store = MemoryRecordStore::new(Environment::Dev);
        let s1 = session(1, 100, 0);
        let s2 = session(1, 101, 100);
        let s3 = session(1, 102, 200);
        for s in [&s2, &s1, &s3] {
            store.save_driver_session(s).await?;
        }
        let found = store
            .get_driver_sessions_by_time_range(DriverId::new(1), s1.start_time, s3.start_time)
            .await?;
        assert_eq!(
            found.iter().map(|s| s.subsession_id).collect::<Vec<_>>(),
            vec![SubsessionId::new(100), SubsessionId::new(101)]
        );
        Ok(())
    }
}
