#![deny(missing_docs)]
//! Race-history backend: ingestion pipeline, session tokens, live push.
//!
//! The crate wires nine concerns into one service process:
//!
//! * an upstream client (see the `pitwall-iracing` crate) behind the
//!   [`pitwall_iracing::IracingApi`] trait,
//! * the record store owning all persisted state (drivers, sessions,
//!   journal entries, connection records, the per-driver ingestion lock),
//! * the session-token subsystem (ES256-signed, envelope-encrypted
//!   sensitive claims) over pluggable key providers,
//! * the push fabric fanning server events out to websocket connections,
//! * the durable job queue plus the worker pump with its retry/back-off
//!   wrappers,
//! * the ingestion engine itself, and
//! * the REST/WebSocket API edge.
//!
//! [`init`] assembles everything from a set of [`PitwallBackends`] and
//! returns the axum [`Router`] together with the spawned worker's join
//! handle. The binary picks backends by environment: memory + local keys
//! in `dev`, Postgres + SQS + KMS in `prod`.
//!
//! If the worker pump dies, the provided `CancellationToken` is cancelled
//! so the hosting process can shut down gracefully. The token can also be
//! cancelled externally to stop the service; await the worker handle after
//! cancelling to finish cleanly.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use eyre::Context as _;
use http::HeaderValue;
use pitwall_iracing::IracingService;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::PitwallConfig,
    services::{
        analytics::AnalyticsService,
        auth::AuthService,
        connections::ConnectionRegistry,
        ingestion::{IngestionConfig, IngestionEngine},
        journal::JournalService,
        push::PushService,
        queue::{EventQueueService, LinearVisibilityTimeout},
        store::RecordStoreService,
        token::{KeyProviderService, TokenService},
        worker::Worker,
    },
};

pub mod api;
pub mod config;
pub mod deadline;
pub mod metrics;
pub mod observability;
pub mod services;
pub mod shutdown;

/// Shared state of the API edge.
#[derive(Clone)]
pub struct AppState {
    /// The record store.
    pub store: RecordStoreService,
    /// The upstream client.
    pub upstream: IracingService,
    /// The token service.
    pub tokens: TokenService,
    /// Auth orchestration.
    pub auth: AuthService,
    /// The push fabric.
    pub push: PushService,
    /// The in-process connection registry.
    pub registry: ConnectionRegistry,
    /// The ingestion job queue.
    pub queue: EventQueueService,
    /// Analytics queries.
    pub analytics: AnalyticsService,
    /// Journal operations.
    pub journal: JournalService,
    /// Max message size accepted on websocket connections.
    pub ws_max_message_size: usize,
}

/// The pluggable backends the service runs on.
pub struct PitwallBackends {
    /// Record store (Postgres in prod, memory in dev/tests).
    pub store: RecordStoreService,
    /// Job queue (SQS in prod, memory in dev/tests).
    pub queue: EventQueueService,
    /// Key provider (KMS or local PEM keys).
    pub key_provider: KeyProviderService,
    /// Upstream client.
    pub upstream: IracingService,
}

/// A fully assembled service.
pub struct PitwallService {
    /// The HTTP router, ready for `axum::serve`.
    pub router: Router,
    /// Join handle of the worker pump task.
    pub worker: tokio::task::JoinHandle<eyre::Result<()>>,
    /// The shared state, exposed for tests and embedders.
    pub state: AppState,
}

/// Assembles services, the router, and the worker pump.
pub fn init(
    config: &PitwallConfig,
    backends: PitwallBackends,
    cancellation_token: CancellationToken,
) -> eyre::Result<PitwallService> {
    let tokens = TokenService::new(
        backends.key_provider,
        config.token_issuer.clone(),
        config.token_expiry,
    );
    let registry = ConnectionRegistry::default();
    let push = PushService::new(registry.clone(), Arc::clone(&backends.store));
    let auth = AuthService::new(
        Arc::clone(&backends.upstream),
        Arc::clone(&backends.store),
        tokens.clone(),
    );
    let analytics = AnalyticsService::new(Arc::clone(&backends.store));
    let journal = JournalService::new(Arc::clone(&backends.store));

    let engine = Arc::new(IngestionEngine::new(
        Arc::clone(&backends.upstream),
        Arc::clone(&backends.store),
        push.clone(),
        IngestionConfig {
            search_window_days: config.search_window_days,
            race_concurrency: config.race_concurrency,
            lap_concurrency: config.lap_concurrency,
            lock_duration: config.lock_duration,
        },
    ));
    let worker = Worker::new(
        Arc::clone(&backends.queue),
        engine,
        Arc::new(LinearVisibilityTimeout::new(config.visibility_step)),
        config.job_timeout,
        config.deadline_buffer,
    );
    let worker_handle = tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            // shut the service down if the pump ever dies
            let _drop_guard = cancellation_token.clone().drop_guard();
            worker.run(cancellation_token).await
        }
    });

    let state = AppState {
        store: backends.store,
        upstream: backends.upstream,
        tokens,
        auth,
        push,
        registry,
        queue: backends.queue,
        analytics,
        journal,
        ws_max_message_size: config.ws_max_message_size,
    };
    let router = build_router(state.clone(), config.cors_origin.as_deref())?;

    Ok(PitwallService {
        router,
        worker: worker_handle,
        state,
    })
}

/// Builds the full route tree with the middleware stack.
pub fn build_router(state: AppState, cors_origin: Option<&str>) -> eyre::Result<Router> {
    let driver_routes = Router::new()
        .route("/analytics", get(api::analytics::get_analytics))
        .route("/analytics/dimensions", get(api::analytics::get_dimensions))
        .route("/journal", get(api::journal::list_entries))
        .route(
            "/journal/{race_id}",
            get(api::journal::get_entry)
                .put(api::journal::save_entry)
                .delete(api::journal::delete_entry),
        )
        .layer(axum_middleware::from_fn(
            api::middleware::require_driver_ownership,
        ));

    let authed = Router::new()
        .route("/auth/refresh", post(api::auth::refresh))
        .route("/ingestion/race", post(api::ingestion::request_ingestion))
        .route("/cars", get(api::content::cars))
        .route("/cars/assets", get(api::content::car_assets))
        .route("/tracks", get(api::content::tracks))
        .route("/tracks/assets", get(api::content::track_assets))
        .route("/series", get(api::content::series))
        .nest("/drivers/{driver_id}", driver_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            api::middleware::require_session,
        ));

    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .context("while parsing CORS origin")?,
            )
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
            .max_age(Duration::from_secs(3600)),
        None => CorsLayer::permissive(),
    };

    Ok(Router::new()
        .merge(api::health::routes())
        .route("/auth/ir/callback", post(api::auth::callback))
        .route("/ws", get(api::ws::ws_handler))
        .merge(authed)
        .with_state(state)
        .layer(axum_middleware::from_fn(api::middleware::correlation))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new()))
}
