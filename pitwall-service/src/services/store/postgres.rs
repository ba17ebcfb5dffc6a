//! Postgres implementation of [`RecordStore`] using `sqlx`.
//!
//! The ingestion lock is a single conditional `UPDATE` on the driver row,
//! never a read-then-write. Session idempotency rides on the primary key
//! plus the unique `(driver_id, subsession_id)` index with
//! `ON CONFLICT DO NOTHING`.

use std::{collections::HashMap, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::instrument;

use pitwall_types::{
    ConnectionId, DriverId, RaceId, SubsessionId,
    driver::{Driver, DriverSession, LapDetails},
    journal::JournalEntry,
    ws::WsConnection,
};

use crate::services::store::RecordStore;

/// The postgres record store wrapping a `PgPool`.
pub struct PostgresRecordStore(PgPool);

#[derive(Debug, sqlx::FromRow)]
struct DriverRow {
    driver_id: i64,
    driver_name: String,
    first_login: DateTime<Utc>,
    last_login: DateTime<Utc>,
    login_count: i64,
    ingestion_blocked_until: Option<DateTime<Utc>>,
    entitlements: Vec<String>,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Driver {
            driver_id: DriverId::new(row.driver_id),
            driver_name: row.driver_name,
            first_login: row.first_login,
            last_login: row.last_login,
            login_count: row.login_count,
            ingestion_blocked_until: row.ingestion_blocked_until,
            entitlements: row.entitlements,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    driver_id: i64,
    start_time: DateTime<Utc>,
    subsession_id: i64,
    series_id: i64,
    car_id: i64,
    track_id: i64,
    old_irating: i32,
    new_irating: i32,
    old_cpi: f64,
    new_cpi: f64,
    start_position: i32,
    finish_position: i32,
    incidents: i32,
    average_lap_time: Option<i64>,
    best_lap_time: Option<i64>,
    laps_complete: Option<i32>,
    laps_led: Option<i32>,
}

impl From<SessionRow> for DriverSession {
    fn from(row: SessionRow) -> Self {
        // laps_complete doubles as the presence marker for lap details
        let lap_details = row.laps_complete.map(|laps_complete| LapDetails {
            average_lap_time: row.average_lap_time,
            best_lap_time: row.best_lap_time,
            laps_complete,
            laps_led: row.laps_led.unwrap_or_default(),
        });
        DriverSession {
            driver_id: DriverId::new(row.driver_id),
            start_time: row.start_time,
            series_id: row.series_id,
            car_id: row.car_id,
            track_id: row.track_id,
            subsession_id: SubsessionId::new(row.subsession_id),
            old_irating: row.old_irating,
            new_irating: row.new_irating,
            old_cpi: row.old_cpi,
            new_cpi: row.new_cpi,
            start_position: row.start_position,
            finish_position: row.finish_position,
            incidents: row.incidents,
            lap_details,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JournalRow {
    driver_id: i64,
    race_id: i64,
    notes: String,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JournalRow> for JournalEntry {
    fn from(row: JournalRow) -> Self {
        JournalEntry {
            driver_id: DriverId::new(row.driver_id),
            race_id: RaceId::new(row.race_id),
            notes: row.notes,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConnectionRow {
    driver_id: i64,
    connection_id: String,
    created_at: DateTime<Utc>,
}

impl From<ConnectionRow> for WsConnection {
    fn from(row: ConnectionRow) -> Self {
        WsConnection {
            driver_id: DriverId::new(row.driver_id),
            connection_id: ConnectionId::new(row.connection_id),
            created_at: row.created_at,
        }
    }
}

impl PostgresRecordStore {
    /// Initializes a `PostgresRecordStore` by connecting to the provided
    /// `connection_string` and running pending migrations.
    #[instrument(level = "info", skip_all)]
    pub async fn init(
        connection_string: &SecretString,
        max_connections: NonZeroU32,
    ) -> eyre::Result<Self> {
        tracing::info!("connecting to DB...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .connect(connection_string.expose_secret())
            .await
            .context("while connecting to postgres DB")?;
        tracing::info!("running migrations..");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("while running migrations")?;
        Ok(Self(pool))
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get_driver(&self, driver_id: DriverId) -> eyre::Result<Option<Driver>> {
        let row: Option<DriverRow> = sqlx::query_as(
            r#"
                SELECT driver_id, driver_name, first_login, last_login,
                       login_count, ingestion_blocked_until, entitlements
                FROM drivers
                WHERE driver_id = $1
            "#,
        )
        .bind(driver_id.into_inner())
        .fetch_optional(&self.0)
        .await
        .context("while fetching driver")?;
        Ok(row.map(Driver::from))
    }

    async fn insert_driver(&self, driver: &Driver) -> eyre::Result<()> {
        sqlx::query(
            r#"
                INSERT INTO drivers
                    (driver_id, driver_name, first_login, last_login,
                     login_count, ingestion_blocked_until, entitlements)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (driver_id) DO NOTHING
            "#,
        )
        .bind(driver.driver_id.into_inner())
        .bind(&driver.driver_name)
        .bind(driver.first_login)
        .bind(driver.last_login)
        .bind(driver.login_count)
        .bind(driver.ingestion_blocked_until)
        .bind(&driver.entitlements)
        .execute(&self.0)
        .await
        .context("while inserting driver")?;
        Ok(())
    }

    async fn record_login(&self, driver_id: DriverId, at: DateTime<Utc>) -> eyre::Result<()> {
        sqlx::query(
            r#"
                UPDATE drivers
                SET login_count = login_count + 1,
                    last_login = $2,
                    updated_at = now()
                WHERE driver_id = $1
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(at)
        .execute(&self.0)
        .await
        .context("while recording login")?;
        Ok(())
    }

    async fn save_driver_session(&self, session: &DriverSession) -> eyre::Result<bool> {
        let lap = session.lap_details;
        let result = sqlx::query(
            r#"
                INSERT INTO driver_sessions
                    (driver_id, start_time, subsession_id, series_id, car_id,
                     track_id, old_irating, new_irating, old_cpi, new_cpi,
                     start_position, finish_position, incidents,
                     average_lap_time, best_lap_time, laps_complete, laps_led)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                        $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT DO NOTHING
            "#,
        )
        .bind(session.driver_id.into_inner())
        .bind(session.start_time)
        .bind(session.subsession_id.into_inner())
        .bind(session.series_id)
        .bind(session.car_id)
        .bind(session.track_id)
        .bind(session.old_irating)
        .bind(session.new_irating)
        .bind(session.old_cpi)
        .bind(session.new_cpi)
        .bind(session.start_position)
        .bind(session.finish_position)
        .bind(session.incidents)
        .bind(lap.and_then(|l| l.average_lap_time))
        .bind(lap.and_then(|l| l.best_lap_time))
        .bind(lap.map(|l| l.laps_complete))
        .bind(lap.map(|l| l.laps_led))
        .execute(&self.0)
        .await
        .context("while inserting driver session")?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_driver_session(
        &self,
        driver_id: DriverId,
        start_time: DateTime<Utc>,
    ) -> eyre::Result<Option<DriverSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
                SELECT driver_id, start_time, subsession_id, series_id, car_id,
                       track_id, old_irating, new_irating, old_cpi, new_cpi,
                       start_position, finish_position, incidents,
                       average_lap_time, best_lap_time, laps_complete, laps_led
                FROM driver_sessions
                WHERE driver_id = $1 AND start_time = $2
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(start_time)
        .fetch_optional(&self.0)
        .await
        .context("while fetching driver session")?;
        Ok(row.map(DriverSession::from))
    }

    async fn get_driver_sessions_by_subsessions(
        &self,
        driver_id: DriverId,
        subsession_ids: &[SubsessionId],
    ) -> eyre::Result<Vec<Option<DriverSession>>> {
        let ids: Vec<i64> = subsession_ids.iter().map(|id| id.into_inner()).collect();
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
                SELECT driver_id, start_time, subsession_id, series_id, car_id,
                       track_id, old_irating, new_irating, old_cpi, new_cpi,
                       start_position, finish_position, incidents,
                       average_lap_time, best_lap_time, laps_complete, laps_led
                FROM driver_sessions
                WHERE driver_id = $1 AND subsession_id = ANY($2)
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(&ids)
        .fetch_all(&self.0)
        .await
        .context("while batch-fetching driver sessions")?;
        let mut by_subsession: HashMap<i64, DriverSession> = rows
            .into_iter()
            .map(|row| (row.subsession_id, DriverSession::from(row)))
            .collect();
        // request order, misses as None
        Ok(subsession_ids
            .iter()
            .map(|id| by_subsession.remove(&id.into_inner()))
            .collect())
    }

    async fn get_driver_sessions_by_time_range(
        &self,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> eyre::Result<Vec<DriverSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
                SELECT driver_id, start_time, subsession_id, series_id, car_id,
                       track_id, old_irating, new_irating, old_cpi, new_cpi,
                       start_position, finish_position, incidents,
                       average_lap_time, best_lap_time, laps_complete, laps_led
                FROM driver_sessions
                WHERE driver_id = $1 AND start_time >= $2 AND start_time < $3
                ORDER BY start_time ASC
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(from)
        .bind(to)
        .fetch_all(&self.0)
        .await
        .context("while fetching driver sessions by time range")?;
        Ok(rows.into_iter().map(DriverSession::from).collect())
    }

    async fn save_journal_entry(&self, entry: &JournalEntry) -> eyre::Result<()> {
        sqlx::query(
            r#"
                INSERT INTO journal_entries
                    (driver_id, race_id, notes, tags, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (driver_id, race_id) DO UPDATE
                SET notes = EXCLUDED.notes,
                    tags = EXCLUDED.tags,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(entry.driver_id.into_inner())
        .bind(entry.race_id.into_inner())
        .bind(&entry.notes)
        .bind(&entry.tags)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.0)
        .await
        .context("while saving journal entry")?;
        Ok(())
    }

    async fn get_journal_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> eyre::Result<Option<JournalEntry>> {
        let row: Option<JournalRow> = sqlx::query_as(
            r#"
                SELECT driver_id, race_id, notes, tags, created_at, updated_at
                FROM journal_entries
                WHERE driver_id = $1 AND race_id = $2
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(race_id.into_inner())
        .fetch_optional(&self.0)
        .await
        .context("while fetching journal entry")?;
        Ok(row.map(JournalEntry::from))
    }

    async fn list_journal_entries(&self, driver_id: DriverId) -> eyre::Result<Vec<JournalEntry>> {
        let rows: Vec<JournalRow> = sqlx::query_as(
            r#"
                SELECT driver_id, race_id, notes, tags, created_at, updated_at
                FROM journal_entries
                WHERE driver_id = $1
                ORDER BY race_id DESC
            "#,
        )
        .bind(driver_id.into_inner())
        .fetch_all(&self.0)
        .await
        .context("while listing journal entries")?;
        Ok(rows.into_iter().map(JournalEntry::from).collect())
    }

    async fn delete_journal_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> eyre::Result<()> {
        sqlx::query(
            r#"
                DELETE FROM journal_entries
                WHERE driver_id = $1 AND race_id = $2
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(race_id.into_inner())
        .execute(&self.0)
        .await
        .context("while deleting journal entry")?;
        Ok(())
    }

    async fn save_connection(&self, connection: &WsConnection) -> eyre::Result<()> {
        sqlx::query(
            r#"
                INSERT INTO ws_connections (driver_id, connection_id, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (driver_id, connection_id) DO NOTHING
            "#,
        )
        .bind(connection.driver_id.into_inner())
        .bind(connection.connection_id.as_str())
        .bind(connection.created_at)
        .execute(&self.0)
        .await
        .context("while saving connection")?;
        Ok(())
    }

    async fn get_connections_by_driver(
        &self,
        driver_id: DriverId,
    ) -> eyre::Result<Vec<WsConnection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
                SELECT driver_id, connection_id, created_at
                FROM ws_connections
                WHERE driver_id = $1
            "#,
        )
        .bind(driver_id.into_inner())
        .fetch_all(&self.0)
        .await
        .context("while fetching connections")?;
        Ok(rows.into_iter().map(WsConnection::from).collect())
    }

    async fn delete_connection(
        &self,
        driver_id: DriverId,
        connection_id: &ConnectionId,
    ) -> eyre::Result<()> {
        sqlx::query(
            r#"
                DELETE FROM ws_connections
                WHERE driver_id = $1 AND connection_id = $2
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(connection_id.as_str())
        .execute(&self.0)
        .await
        .context("while deleting connection")?;
        Ok(())
    }

    async fn acquire_ingestion_lock(
        &self,
        driver_id: DriverId,
        duration: Duration,
    ) -> eyre::Result<bool> {
        let now = Utc::now();
        let until = now + duration;
        // one conditional write; no read-then-write
        let result = sqlx::query(
            r#"
                UPDATE drivers
                SET ingestion_blocked_until = $2, updated_at = now()
                WHERE driver_id = $1
                  AND (ingestion_blocked_until IS NULL OR ingestion_blocked_until < $3)
            "#,
        )
        .bind(driver_id.into_inner())
        .bind(until)
        .bind(now)
        .execute(&self.0)
        .await
        .context("while acquiring ingestion lock")?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_ingestion_lock(&self, driver_id: DriverId) -> eyre::Result<()> {
        sqlx::query(
            r#"
                UPDATE drivers
                SET ingestion_blocked_until = NULL, updated_at = now()
                WHERE driver_id = $1
            "#,
        )
        .bind(driver_id.into_inner())
        .execute(&self.0)
        .await
        .context("while releasing ingestion lock")?;
        Ok(())
    }
}
