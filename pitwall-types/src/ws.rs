//! WebSocket wire types.
//!
//! Every frame in either direction is a JSON object `{action, payload}`.
//! Clients send [`actions::AUTH`] and [`actions::PING_REQUEST`]; the server
//! answers with the corresponding responses and additionally streams
//! ingestion lifecycle events to authenticated connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{ConnectionId, DriverId, SubsessionId};

/// Route keys and server-side action names.
pub mod actions {
    /// Client authenticates the connection with a session token.
    pub const AUTH: &str = "auth";
    /// Client liveness probe.
    pub const PING_REQUEST: &str = "pingRequest";
    /// Server answer to [`AUTH`].
    pub const AUTH_RESPONSE: &str = "authResponse";
    /// Server answer to [`PING_REQUEST`].
    pub const PING_RESPONSE: &str = "pingResponse";
    /// Server progress event during ingestion.
    pub const INGESTION_PROGRESS: &str = "ingestion_progress";
    /// Server completion event after ingestion.
    pub const INGESTION_COMPLETE: &str = "ingestion_complete";
    /// Server event emitted when an ingestion job aborts.
    pub const INGESTION_ERROR: &str = "ingestion_error";
    /// Server event emitted when the ingestion lock is already held.
    pub const INGESTION_BUSY: &str = "ingestion_busy";
}

/// An incoming client frame, with the payload left raw until the action is
/// dispatched.
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    /// The route key.
    pub action: String,
    /// Raw payload; parsed per action.
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

/// An outgoing server frame.
#[derive(Debug, Serialize)]
pub struct ServerEnvelope<T> {
    /// The action name.
    pub action: &'static str,
    /// The action payload.
    pub payload: T,
}

/// Payload of the client `auth` frame.
#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    /// The session token to authenticate the connection with.
    pub token: String,
}

/// Payload of the server `authResponse` frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponsePayload {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Driver id bound to the connection, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<DriverId>,
    /// The connection id, on success. Clients pass this back as
    /// `notifyConnectionId` when requesting ingestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
}

/// Payload of the `ingestion_progress` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestionProgressPayload {
    /// Sessions persisted so far. Monotonic from the client's point of view;
    /// regressions under network reordering must be ignored.
    pub processed: usize,
    /// Total candidate sessions in this job.
    pub total: usize,
    /// Subsession just persisted.
    #[serde(rename = "currentSubsessionID")]
    pub current_subsession_id: SubsessionId,
}

/// Payload of the `ingestion_complete` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestionCompletePayload {
    /// Newly persisted sessions.
    pub added: usize,
    /// Candidates already present in the store.
    pub skipped: usize,
    /// Number of per-subsession errors collected during the job.
    #[serde(rename = "errorsCount")]
    pub errors_count: usize,
}

/// Payload of the `ingestion_error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionErrorPayload {
    /// Human-readable abort reason.
    pub reason: String,
}

/// A live WebSocket connection record, persisted for per-driver fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WsConnection {
    /// Driver the connection authenticated as.
    pub driver_id: DriverId,
    /// Transport connection id.
    pub connection_id: ConnectionId,
    /// When the connection authenticated.
    pub created_at: DateTime<Utc>,
}
