//! Shared fixtures for the integration suites: a scriptable upstream fake
//! and helpers to assemble the service over the in-memory backends.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio::sync::{Semaphore, mpsc};

use pitwall_iracing::{
    IracingApi, IracingService, UpstreamError,
    types::{
        Car, DriverResult, LapData, RaceCandidate, Series, SimsessionResults, SubsessionResult,
        TokenResponse, Track, TrackRef, UserInfo,
    },
};
use pitwall_service::{
    AppState,
    config::Environment,
    services::{
        analytics::AnalyticsService,
        auth::AuthService,
        connections::{ConnectionRegistry, Outbound},
        ingestion::{IngestionConfig, IngestionEngine},
        journal::JournalService,
        push::PushService,
        queue::memory::MemoryQueue,
        store::{RecordStore as _, RecordStoreService, memory::MemoryRecordStore},
        token::{TokenService, local::LocalKeyProvider},
    },
};
use pitwall_types::{ConnectionId, DriverId, SubsessionId, driver::Driver};

/// A scriptable in-memory stand-in for the upstream API.
#[derive(Default)]
pub struct FakeIracing {
    pub candidates: Mutex<Vec<RaceCandidate>>,
    pub results: Mutex<HashMap<SubsessionId, SubsessionResult>>,
    pub lap_data: Mutex<HashMap<SubsessionId, LapData>>,
    /// When set, every authenticated call fails with the sentinel.
    pub reject_tokens: AtomicBool,
    /// Subsessions whose result fetch fails with a 500.
    pub failing_results: Mutex<Vec<SubsessionId>>,
    /// When present, `search_series` waits for a permit before answering.
    pub search_barrier: Mutex<Option<Arc<Semaphore>>>,
    pub search_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub lap_calls: AtomicUsize,
    pub user: Mutex<Option<UserInfo>>,
}

impl FakeIracing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a race: a candidate plus its matching result and lap data.
    pub fn add_race(&self, driver_id: DriverId, subsession_id: i64, start_time: DateTime<Utc>) {
        let subsession_id = SubsessionId::new(subsession_id);
        self.candidates.lock().push(RaceCandidate {
            subsession_id,
            start_time,
            series_id: 285,
            car_id: 43,
            track: TrackRef { track_id: 18 },
        });
        self.results.lock().insert(
            subsession_id,
            SubsessionResult {
                subsession_id,
                start_time,
                series_id: 285,
                track: TrackRef { track_id: 18 },
                session_results: vec![SimsessionResults {
                    simsession_number: 0,
                    results: vec![DriverResult {
                        cust_id: driver_id,
                        car_id: 43,
                        starting_position: 5,
                        finish_position: 2,
                        oldi_rating: 1500,
                        newi_rating: 1550,
                        old_cpi: 3.0,
                        new_cpi: 3.2,
                        incidents: 3,
                    }],
                }],
            },
        );
        self.lap_data.lock().insert(
            subsession_id,
            LapData {
                laps_complete: 21,
                laps_led: 0,
                average_lap_time: Some(812_345),
                best_lap_time: Some(801_234),
            },
        );
    }

    fn check_token(&self) -> Result<(), UpstreamError> {
        if self.reject_tokens.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unauthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl IracingApi for FakeIracing {
    async fn exchange_authorization_code(
        &self,
        _code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse, UpstreamError> {
        self.check_token()?;
        Ok(TokenResponse {
            access_token: "upstream-access".to_owned(),
            refresh_token: "upstream-refresh".to_owned(),
            expires_in: 3600,
        })
    }

    async fn refresh_token(
        &self,
        _refresh_token: &SecretString,
    ) -> Result<TokenResponse, UpstreamError> {
        self.check_token()?;
        Ok(TokenResponse {
            access_token: "upstream-access-2".to_owned(),
            refresh_token: "upstream-refresh-2".to_owned(),
            expires_in: 3600,
        })
    }

    async fn user_info(&self, _access_token: &SecretString) -> Result<UserInfo, UpstreamError> {
        self.check_token()?;
        self.user
            .lock()
            .clone()
            .ok_or(UpstreamError::Unauthorized)
    }

    async fn search_series(
        &self,
        _access_token: &SecretString,
        _driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RaceCandidate>, UpstreamError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token()?;
        let barrier = self.search_barrier.lock().clone();
        if let Some(barrier) = barrier {
            let permit = barrier
                .acquire()
                .await
                .map_err(|_| UpstreamError::RateLimited)?;
            permit.forget();
        }
        Ok(self
            .candidates
            .lock()
            .iter()
            .filter(|c| c.start_time >= from && c.start_time < to)
            .cloned()
            .collect())
    }

    async fn subsession_result(
        &self,
        _access_token: &SecretString,
        subsession_id: SubsessionId,
    ) -> Result<SubsessionResult, UpstreamError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token()?;
        if self.failing_results.lock().contains(&subsession_id) {
            return Err(UpstreamError::Status {
                status: 500,
                body: "scripted failure".to_owned(),
            });
        }
        self.results
            .lock()
            .get(&subsession_id)
            .cloned()
            .ok_or(UpstreamError::Status {
                status: 404,
                body: "unknown subsession".to_owned(),
            })
    }

    async fn lap_data(
        &self,
        _access_token: &SecretString,
        subsession_id: SubsessionId,
        _simsession_number: i32,
        _driver_id: DriverId,
    ) -> Result<Option<LapData>, UpstreamError> {
        self.lap_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token()?;
        Ok(self.lap_data.lock().get(&subsession_id).copied())
    }

    async fn cars(&self, _access_token: &SecretString) -> Result<Vec<Car>, UpstreamError> {
        self.check_token()?;
        Ok(vec![Car {
            car_id: 43,
            car_name: "Dallara P217".to_owned(),
            car_name_abbreviated: Some("P217".to_owned()),
        }])
    }

    async fn car_assets(
        &self,
        _access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.check_token()?;
        Ok(serde_json::json!({}))
    }

    async fn tracks(&self, _access_token: &SecretString) -> Result<Vec<Track>, UpstreamError> {
        self.check_token()?;
        Ok(vec![Track {
            track_id: 18,
            track_name: "Road Atlanta".to_owned(),
            config_name: Some("Full Course".to_owned()),
        }])
    }

    async fn track_assets(
        &self,
        _access_token: &SecretString,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.check_token()?;
        Ok(serde_json::json!({}))
    }

    async fn series(&self, _access_token: &SecretString) -> Result<Vec<Series>, UpstreamError> {
        self.check_token()?;
        Ok(vec![Series {
            series_id: 285,
            series_name: "IMSA".to_owned(),
            category: Some("sports_car".to_owned()),
        }])
    }

    async fn fetch_doc(
        &self,
        _access_token: &SecretString,
        _path: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.check_token()?;
        Ok(serde_json::json!({}))
    }
}

/// One assembled service over memory backends plus handles to poke it.
pub struct TestHarness {
    pub upstream: Arc<FakeIracing>,
    pub store: RecordStoreService,
    pub queue: Arc<MemoryQueue>,
    pub registry: ConnectionRegistry,
    pub push: PushService,
    pub engine: Arc<IngestionEngine>,
    pub tokens: TokenService,
    pub state: AppState,
}

impl TestHarness {
    pub fn new() -> Self {
        let upstream = Arc::new(FakeIracing::new());
        let upstream_service: IracingService = Arc::clone(&upstream) as IracingService;
        let store: RecordStoreService = Arc::new(MemoryRecordStore::new(Environment::Dev));
        let queue = Arc::new(MemoryQueue::new(Environment::Dev));
        let registry = ConnectionRegistry::default();
        let push = PushService::new(registry.clone(), Arc::clone(&store));
        let tokens = TokenService::new(
            Arc::new(LocalKeyProvider::generate(Environment::Dev)),
            "pitwall-test",
            Duration::from_secs(24 * 3600),
        );
        let engine = Arc::new(IngestionEngine::new(
            Arc::clone(&upstream_service),
            Arc::clone(&store),
            push.clone(),
            IngestionConfig {
                search_window_days: 10,
                race_concurrency: 5,
                lap_concurrency: 3,
                lock_duration: Duration::from_secs(300),
            },
        ));
        let state = AppState {
            store: Arc::clone(&store),
            upstream: Arc::clone(&upstream_service),
            tokens: tokens.clone(),
            auth: AuthService::new(
                Arc::clone(&upstream_service),
                Arc::clone(&store),
                tokens.clone(),
            ),
            push: push.clone(),
            registry: registry.clone(),
            queue: queue.clone(),
            analytics: AnalyticsService::new(Arc::clone(&store)),
            journal: JournalService::new(Arc::clone(&store)),
            ws_max_message_size: 8192,
        };
        Self {
            upstream,
            store,
            queue,
            registry,
            push,
            engine,
            tokens,
            state,
        }
    }

    /// Inserts a driver record.
    pub async fn insert_driver(&self, driver_id: i64, name: &str) -> Driver {
        let now = Utc::now();
        let driver = Driver {
            driver_id: DriverId::new(driver_id),
            driver_name: name.to_owned(),
            first_login: now,
            last_login: now,
            login_count: 1,
            ingestion_blocked_until: None,
            entitlements: vec![],
        };
        self.store.insert_driver(&driver).await.unwrap();
        driver
    }

    /// Registers a live connection and returns its captured frame stream.
    pub fn register_connection(
        &self,
        connection_id: &str,
    ) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(ConnectionId::new(connection_id), tx);
        rx
    }

    /// Mints a valid session token for the given driver.
    pub async fn mint_token(&self, driver_id: i64, name: &str) -> String {
        self.tokens
            .create_token(
                DriverId::new(driver_id),
                name,
                &[],
                "upstream-access",
                "upstream-refresh",
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap()
            .token
    }
}

/// Drains all captured frames, decoding each as `(action, payload)`.
pub fn drain_frames(
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Vec<(String, serde_json::Value)> {
    let mut frames = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Text(text) = outbound {
            let frame: serde_json::Value =
                serde_json::from_str(&text).expect("frames are valid JSON");
            let action = frame["action"].as_str().unwrap_or_default().to_owned();
            frames.push((action, frame["payload"].clone()));
        }
    }
    frames
}
