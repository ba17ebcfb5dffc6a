//! Configuration types and CLI/environment parsing for the pitwall backend.
//!
//! Everything can be configured via environment variables or command line
//! arguments using `clap`. Additionally this module defines the
//! [`Environment`] to assert dev-only code.

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use secrecy::SecretString;

/// The environment the service is running in.
///
/// Main usage for the `Environment` is to call
/// [`Environment::assert_is_dev`]. Services that are intended for `dev` only
/// (like the in-memory record store and queue) shall assert that they are
/// called from the `dev` environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Asserts that `Environment` is `dev`. Panics if not the case.
    pub fn assert_is_dev(&self) {
        assert!(matches!(self, Environment::Dev), "Is not dev environment")
    }
}

/// The configuration for the pitwall backend.
#[derive(Parser, Debug)]
pub struct PitwallConfig {
    /// The environment of the service (either `prod` or `dev`).
    #[clap(long, env = "PITWALL_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// The socket address the HTTP server binds to.
    #[clap(long, env = "PITWALL_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Max time to wait for graceful shutdown of all services.
    #[clap(
        long,
        env = "PITWALL_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,

    /// Max message size the websocket connection accepts.
    ///
    /// Default value: 8 kilobytes
    #[clap(long, env = "PITWALL_WS_MAX_MESSAGE_SIZE", default_value = "8192")]
    pub ws_max_message_size: usize,

    /// Allowed CORS origin for the browser client. If not set, any origin is
    /// mirrored (dev behavior).
    #[clap(long, env = "PITWALL_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Base URL of the upstream data API.
    #[clap(
        long,
        env = "PITWALL_IRACING_DATA_URL",
        default_value = "https://members-ng.iracing.com"
    )]
    pub iracing_data_url: String,

    /// Base URL of the upstream OAuth endpoints.
    #[clap(
        long,
        env = "PITWALL_IRACING_OAUTH_URL",
        default_value = "https://oauth.iracing.com/oauth2"
    )]
    pub iracing_oauth_url: String,

    /// OAuth client id registered with the upstream.
    #[clap(long, env = "PITWALL_IRACING_CLIENT_ID")]
    pub iracing_client_id: String,

    /// Per-request timeout for upstream calls.
    #[clap(
        long,
        env = "PITWALL_IRACING_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub iracing_timeout: Duration,

    /// Issuer claim of minted session tokens.
    #[clap(long, env = "PITWALL_TOKEN_ISSUER", default_value = "pitwall")]
    pub token_issuer: String,

    /// Lifetime of minted session tokens.
    #[clap(
        long,
        env = "PITWALL_TOKEN_EXPIRY",
        default_value = "24h",
        value_parser = humantime::parse_duration
    )]
    pub token_expiry: Duration,

    /// Path to the PKCS#8 PEM ECDSA P-256 signing key (local key provider).
    #[clap(long, env = "PITWALL_SIGNING_KEY_PEM")]
    pub signing_key_pem: Option<PathBuf>,

    /// Base64 of the 32-byte master key wrapping data keys (local key
    /// provider).
    #[clap(long, env = "PITWALL_LOCAL_MASTER_KEY")]
    pub local_master_key: Option<SecretString>,

    /// KMS key id used for ES256 signing (AWS key provider).
    #[clap(long, env = "PITWALL_KMS_SIGNING_KEY_ID")]
    pub kms_signing_key_id: Option<String>,

    /// KMS key id used to generate/decrypt data keys (AWS key provider).
    #[clap(long, env = "PITWALL_KMS_DATA_KEY_ID")]
    pub kms_data_key_id: Option<String>,

    /// The connection string for the Postgres DB.
    #[clap(long, env = "PITWALL_DB_CONNECTION_STRING")]
    pub db_connection_string: Option<SecretString>,

    /// Max connections of the Postgres pool.
    #[clap(long, env = "PITWALL_DB_MAX_CONNECTIONS", default_value = "5")]
    pub db_max_connections: NonZeroU32,

    /// ARN of the ingestion job queue (FIFO).
    #[clap(long, env = "PITWALL_QUEUE_ARN")]
    pub queue_arn: Option<String>,

    /// How far back the ingestion search window reaches.
    #[clap(long, env = "PITWALL_SEARCH_WINDOW_DAYS", default_value = "10")]
    pub search_window_days: i64,

    /// Max concurrent subsession-result fetches per job.
    #[clap(long, env = "PITWALL_RACE_CONCURRENCY", default_value = "5")]
    pub race_concurrency: usize,

    /// Max concurrent lap-data fetches per job.
    #[clap(long, env = "PITWALL_LAP_CONCURRENCY", default_value = "3")]
    pub lap_concurrency: usize,

    /// TTL of the per-driver ingestion lock.
    #[clap(
        long,
        env = "PITWALL_LOCK_DURATION",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub lock_duration: Duration,

    /// Processing budget for a single queue message.
    #[clap(
        long,
        env = "PITWALL_JOB_TIMEOUT",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub job_timeout: Duration,

    /// Buffer subtracted from the job deadline so downstream I/O can abort
    /// with time left to produce a clean error.
    #[clap(
        long,
        env = "PITWALL_DEADLINE_BUFFER",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub deadline_buffer: Duration,

    /// Step of the linear visibility-timeout back-off.
    #[clap(
        long,
        env = "PITWALL_VISIBILITY_STEP",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub visibility_step: Duration,
}
