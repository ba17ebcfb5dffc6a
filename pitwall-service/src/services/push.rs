//! Push fabric: per-connection send, per-driver broadcast, gone reaping.
//!
//! Delivery failure to a single connection is never an error: a gone
//! connection yields `delivered = false` on [`PushService::push`] and is
//! reaped from the store during [`PushService::broadcast`]. Reaping is
//! idempotent, so concurrent broadcasts over the same stale records are
//! benign.

use serde::Serialize;
use tracing::instrument;

use pitwall_types::{ConnectionId, DriverId, ws::ServerEnvelope};

use crate::{
    metrics::METRICS_ID_PUSH_GONE_REAPED,
    services::{
        connections::{ConnectionRegistry, Delivery, Outbound},
        store::RecordStoreService,
    },
};

/// Fans server-generated events out to client connections.
#[derive(Clone)]
pub struct PushService {
    registry: ConnectionRegistry,
    store: RecordStoreService,
}

impl PushService {
    /// Creates the push service.
    pub fn new(registry: ConnectionRegistry, store: RecordStoreService) -> Self {
        Self { registry, store }
    }

    /// Sends `{action, payload}` to a single connection.
    ///
    /// Returns whether the frame was delivered; a gone connection is a
    /// `false`, not an error.
    #[instrument(level = "debug", skip_all, fields(%connection_id, action))]
    pub fn push<T: Serialize>(
        &self,
        connection_id: &ConnectionId,
        action: &'static str,
        payload: T,
    ) -> eyre::Result<bool> {
        let frame = serde_json::to_string(&ServerEnvelope { action, payload })?;
        Ok(matches!(
            self.registry.send(connection_id, Outbound::Text(frame)),
            Delivery::Delivered
        ))
    }

    /// Sends `{action, payload}` to every connection of a driver.
    ///
    /// Connections reported gone are deleted from the store under the same
    /// operation. Returns the first non-gone error, if any.
    #[instrument(level = "debug", skip_all, fields(%driver_id, action))]
    pub async fn broadcast<T: Serialize>(
        &self,
        driver_id: DriverId,
        action: &'static str,
        payload: T,
    ) -> eyre::Result<()> {
        let frame = serde_json::to_string(&ServerEnvelope { action, payload })?;
        let connections = self.store.get_connections_by_driver(driver_id).await?;
        let mut first_error = None;
        for connection in connections {
            match self
                .registry
                .send(&connection.connection_id, Outbound::Text(frame.clone()))
            {
                Delivery::Delivered => {}
                Delivery::Gone => {
                    tracing::debug!("reaping gone connection {}", connection.connection_id);
                    ::metrics::counter!(METRICS_ID_PUSH_GONE_REAPED).increment(1);
                    if let Err(err) = self
                        .store
                        .delete_connection(driver_id, &connection.connection_id)
                        .await
                    {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Asks the socket task to close the connection. Best-effort; failures
    /// are logged and swallowed.
    #[instrument(level = "debug", skip_all, fields(%connection_id))]
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        if self.registry.send(connection_id, Outbound::Close) == Delivery::Gone {
            tracing::debug!("disconnect of already-gone connection {connection_id}");
        }
    }
}
