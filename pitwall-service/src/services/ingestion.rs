//! The ingestion engine.
//!
//! Orchestrates per-driver race + lap ingestion: acquires the store-level
//! single-flight lock, discovers candidate subsessions inside the search
//! window, deduplicates against stored state, fetches results and lap data
//! with bounded concurrency, persists new sessions, and streams progress
//! and completion events to the originating connection.
//!
//! Concurrency model: one task per fresh candidate, gated by two
//! independent permit pools (`race` for result fetches, `lap` for lap
//! fetches). The pools overlap, so a candidate whose result fetch finished
//! enters the lap stage without waiting for its siblings.
//!
//! Failure policy: a single candidate's failure is collected and the job
//! proceeds; an upstream-unauthorized from any call aborts the whole job
//! with its identity intact so the caller can drive re-auth. The lock is
//! released on completion and on every terminal abort; its TTL covers
//! crashed workers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use chrono::{Duration as ChronoDuration, Utc};
use pitwall_iracing::{IracingService, UpstreamError, types::RaceCandidate};
use secrecy::SecretString;
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Instrument as _, instrument};

use pitwall_types::{
    ConnectionId, DriverId, SubsessionId,
    driver::{DriverSession, LapDetails},
    events::IngestionJob,
    ws::{IngestionCompletePayload, IngestionErrorPayload, IngestionProgressPayload, actions},
};

use crate::{
    deadline::Deadline,
    metrics::{
        METRICS_ID_INGESTION_BUSY, METRICS_ID_INGESTION_DURATION, METRICS_ID_INGESTION_JOB_ERRORS,
        METRICS_ID_INGESTION_JOBS, METRICS_ID_SESSIONS_INGESTED,
    },
    services::{push::PushService, store::RecordStoreService},
};

/// Tuning knobs of the engine.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// How far back discovery searches.
    pub search_window_days: i64,
    /// Permit pool size for subsession-result fetches.
    pub race_concurrency: usize,
    /// Permit pool size for lap-data fetches.
    pub lap_concurrency: usize,
    /// TTL of the per-driver ingestion lock.
    pub lock_duration: std::time::Duration,
}

/// Errors that abort an ingestion job.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// An upstream failure that aborted the job. The unauthorized sentinel
    /// keeps its identity through this wrapper.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The job deadline ran out between phases.
    #[error("job deadline exhausted")]
    DeadlineExhausted,
    /// The record store failed.
    #[error("storage failure: {0}")]
    Storage(#[source] eyre::Error),
    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl IngestError {
    /// Returns `true` iff the job failed because the upstream rejected the
    /// access token. Non-retryable; the caller must drive re-auth.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, IngestError::Upstream(upstream) if upstream.is_unauthorized())
    }
}

/// Counters of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    /// Newly persisted sessions.
    pub added: usize,
    /// Candidates skipped because they were already stored.
    pub skipped: usize,
    /// Collected per-candidate errors; these did not abort the job.
    pub errors: Vec<String>,
}

/// Result of a job that ran to an end state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// The per-driver lock was held elsewhere; the job was a no-op.
    Busy,
    /// The pipeline ran; see the stats for what happened.
    Completed(IngestionStats),
}

/// Drives the ingestion pipeline for one driver at a time.
pub struct IngestionEngine {
    upstream: IracingService,
    store: RecordStoreService,
    push: PushService,
    config: IngestionConfig,
}

impl IngestionEngine {
    /// Creates the engine.
    pub fn new(
        upstream: IracingService,
        store: RecordStoreService,
        push: PushService,
        config: IngestionConfig,
    ) -> Self {
        Self {
            upstream,
            store,
            push,
            config,
        }
    }

    /// Runs one ingestion job to an end state.
    ///
    /// The store-level lock is the single-flight source of truth: if the
    /// acquire fails the job pushes `ingestion_busy` and returns without
    /// touching the upstream. Otherwise the pipeline runs and, whatever the
    /// outcome, the lock is released before returning.
    #[instrument(level = "info", skip_all, fields(driver_id = %job.driver_id))]
    pub async fn ingest_races(
        &self,
        job: &IngestionJob,
        deadline: Deadline,
    ) -> Result<IngestionOutcome, IngestError> {
        ::metrics::counter!(METRICS_ID_INGESTION_JOBS).increment(1);
        let started = Instant::now();

        let acquired = self
            .store
            .acquire_ingestion_lock(job.driver_id, self.config.lock_duration)
            .await
            .map_err(IngestError::Storage)?;
        if !acquired {
            tracing::info!("ingestion lock held elsewhere, job is a no-op");
            ::metrics::counter!(METRICS_ID_INGESTION_BUSY).increment(1);
            self.push_to_notify(job, actions::INGESTION_BUSY, serde_json::json!({}));
            return Ok(IngestionOutcome::Busy);
        }

        match self.run_locked(job, deadline).await {
            Ok(stats) => {
                tracing::info!(
                    "job done: {} added, {} skipped, {} errors",
                    stats.added,
                    stats.skipped,
                    stats.errors.len()
                );
                self.push_to_notify(
                    job,
                    actions::INGESTION_COMPLETE,
                    IngestionCompletePayload {
                        added: stats.added,
                        skipped: stats.skipped,
                        errors_count: stats.errors.len(),
                    },
                );
                ::metrics::counter!(METRICS_ID_SESSIONS_INGESTED).increment(stats.added as u64);
                ::metrics::histogram!(METRICS_ID_INGESTION_DURATION)
                    .record(started.elapsed().as_millis() as f64);
                if let Err(err) = self.store.release_ingestion_lock(job.driver_id).await {
                    // a stuck lock blocks the driver until the TTL runs out,
                    // so this counts as a terminal abort
                    ::metrics::counter!(METRICS_ID_INGESTION_JOB_ERRORS).increment(1);
                    self.push_to_notify(
                        job,
                        actions::INGESTION_ERROR,
                        IngestionErrorPayload {
                            reason: "could not release ingestion lock".to_owned(),
                        },
                    );
                    return Err(IngestError::Storage(err));
                }
                Ok(IngestionOutcome::Completed(stats))
            }
            Err(err) => {
                ::metrics::counter!(METRICS_ID_INGESTION_JOB_ERRORS).increment(1);
                self.push_to_notify(
                    job,
                    actions::INGESTION_ERROR,
                    IngestionErrorPayload {
                        reason: abort_reason(&err),
                    },
                );
                if let Err(release_err) = self.store.release_ingestion_lock(job.driver_id).await {
                    tracing::error!(
                        "could not release ingestion lock after failed job: {release_err:?}"
                    );
                }
                Err(err)
            }
        }
    }

    /// The pipeline proper; runs with the lock held.
    async fn run_locked(
        &self,
        job: &IngestionJob,
        deadline: Deadline,
    ) -> Result<IngestionStats, IngestError> {
        let access_token = Arc::new(SecretString::from(job.iracing_access_token.clone()));

        check_deadline(deadline)?;
        let now = Utc::now();
        let from = now - ChronoDuration::days(self.config.search_window_days);
        let candidates = self
            .upstream
            .search_series(&access_token, job.driver_id, from, now)
            .await?;
        tracing::info!("found {} candidate subsessions", candidates.len());

        check_deadline(deadline)?;
        // dedup against the store before spending any upstream quota
        let subsession_ids: Vec<SubsessionId> =
            candidates.iter().map(|c| c.subsession_id).collect();
        let existing = self
            .store
            .get_driver_sessions_by_subsessions(job.driver_id, &subsession_ids)
            .await
            .map_err(IngestError::Storage)?;
        let mut stats = IngestionStats::default();
        let mut fresh = Vec::new();
        for (candidate, stored) in candidates.into_iter().zip(existing) {
            if stored.is_some() {
                stats.skipped += 1;
            } else {
                fresh.push(candidate);
            }
        }
        if fresh.is_empty() {
            return Ok(stats);
        }

        check_deadline(deadline)?;
        let race_permits = Arc::new(Semaphore::new(self.config.race_concurrency));
        let lap_permits = Arc::new(Semaphore::new(self.config.lap_concurrency));
        let processed = Arc::new(AtomicUsize::new(0));
        let total = fresh.len();
        let mut tasks = JoinSet::new();
        for candidate in fresh {
            let unit = CandidateUnit {
                upstream: Arc::clone(&self.upstream),
                store: Arc::clone(&self.store),
                push: self.push.clone(),
                race_permits: Arc::clone(&race_permits),
                lap_permits: Arc::clone(&lap_permits),
                access_token: Arc::clone(&access_token),
                driver_id: job.driver_id,
                notify: job.notify_connection_id.clone(),
                processed: Arc::clone(&processed),
                total,
            };
            let span = tracing::info_span!(
                "candidate",
                subsession_id = %candidate.subsession_id
            );
            tasks.spawn(unit.ingest(candidate).instrument(span));
        }

        while let Some(joined) = tasks.join_next().await {
            if deadline.expired() {
                tasks.abort_all();
                return Err(IngestError::DeadlineExhausted);
            }
            match joined {
                Ok(Ok(true)) => stats.added += 1,
                // lost an insert race; the row exists, count it as skipped
                Ok(Ok(false)) => stats.skipped += 1,
                Ok(Err(err)) if err.is_unauthorized() => {
                    tasks.abort_all();
                    return Err(err);
                }
                // a rate-limit signal means every remaining fetch is doomed;
                // fail the job retryably and let the queue reschedule it
                Ok(Err(IngestError::Upstream(upstream @ UpstreamError::RateLimited))) => {
                    tasks.abort_all();
                    return Err(IngestError::Upstream(upstream));
                }
                Ok(Err(err)) => {
                    tracing::warn!("candidate failed, continuing: {err}");
                    stats.errors.push(err.to_string());
                }
                Err(join_err) => {
                    tracing::error!("candidate task died: {join_err}");
                    stats.errors.push("subsession task failed".to_owned());
                }
            }
        }
        Ok(stats)
    }

    /// Pushes to the job's notify connection, if one was given. Delivery
    /// failure is logged, never fatal.
    fn push_to_notify<T: Serialize>(&self, job: &IngestionJob, action: &'static str, payload: T) {
        let Some(notify) = job.notify_connection_id.as_ref() else {
            return;
        };
        match self.push.push(notify, action, payload) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("{action} push hit a gone connection"),
            Err(err) => tracing::warn!("could not push {action}: {err:?}"),
        }
    }
}

/// Everything one candidate's pipeline needs.
struct CandidateUnit {
    upstream: IracingService,
    store: RecordStoreService,
    push: PushService,
    race_permits: Arc<Semaphore>,
    lap_permits: Arc<Semaphore>,
    access_token: Arc<SecretString>,
    driver_id: DriverId,
    notify: Option<ConnectionId>,
    processed: Arc<AtomicUsize>,
    total: usize,
}

impl CandidateUnit {
    /// Fetch result, fetch lap data, persist, push progress.
    ///
    /// Returns whether a new row was written. `Ok(false)` means another
    /// writer got there first, which is fine — uniqueness is by key.
    async fn ingest(self, candidate: RaceCandidate) -> Result<bool, IngestError> {
        let subsession_id = candidate.subsession_id;
        let result = {
            let _permit = self
                .race_permits
                .acquire()
                .await
                .map_err(|_| IngestError::Internal("race permit pool closed".to_owned()))?;
            self.upstream
                .subsession_result(&self.access_token, subsession_id)
                .await?
        };
        let row = result
            .driver_race_result(self.driver_id)
            .ok_or_else(|| {
                IngestError::Internal(format!(
                    "driver missing from subsession {subsession_id} results"
                ))
            })?
            .clone();

        let lap_data = {
            let _permit = self
                .lap_permits
                .acquire()
                .await
                .map_err(|_| IngestError::Internal("lap permit pool closed".to_owned()))?;
            self.upstream
                .lap_data(&self.access_token, subsession_id, 0, self.driver_id)
                .await?
        };

        let session = DriverSession {
            driver_id: self.driver_id,
            // the result payload is authoritative for the start time
            start_time: result.start_time,
            series_id: result.series_id,
            car_id: row.car_id,
            track_id: result.track.track_id,
            subsession_id,
            old_irating: row.oldi_rating,
            new_irating: row.newi_rating,
            old_cpi: row.old_cpi,
            new_cpi: row.new_cpi,
            start_position: row.starting_position,
            finish_position: row.finish_position,
            incidents: row.incidents,
            lap_details: lap_data.map(|lap| LapDetails {
                average_lap_time: lap.average_lap_time,
                best_lap_time: lap.best_lap_time,
                laps_complete: lap.laps_complete,
                laps_led: lap.laps_led,
            }),
        };
        let inserted = self
            .store
            .save_driver_session(&session)
            .await
            .map_err(IngestError::Storage)?;

        if inserted {
            let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(notify) = self.notify.as_ref() {
                let pushed = self.push.push(
                    notify,
                    actions::INGESTION_PROGRESS,
                    IngestionProgressPayload {
                        processed,
                        total: self.total,
                        current_subsession_id: subsession_id,
                    },
                );
                match pushed {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!("progress push hit a gone connection"),
                    Err(err) => tracing::warn!("could not push progress: {err:?}"),
                }
            }
        }
        Ok(inserted)
    }
}

fn check_deadline(deadline: Deadline) -> Result<(), IngestError> {
    if deadline.expired() {
        return Err(IngestError::DeadlineExhausted);
    }
    Ok(())
}

fn abort_reason(err: &IngestError) -> String {
    if err.is_unauthorized() {
        "upstream authorization expired, sign in again".to_owned()
    } else {
        err.to_string()
    }
}
