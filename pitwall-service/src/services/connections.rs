//! In-process registry of live WebSocket senders.
//!
//! The registry maps connection ids to the outbound channel of the task
//! owning the socket. The durable `(driver_id, connection_id)` records used
//! for fan-out live in the record store; this registry is only the delivery
//! transport. A connection id that is absent here (or whose channel is
//! closed) is the gone-class outcome.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use pitwall_types::ConnectionId;
use tokio::sync::mpsc;

use crate::metrics::METRICS_ID_WS_CONNECTIONS_OPEN;

/// A frame handed to the socket task for delivery.
#[derive(Debug)]
pub enum Outbound {
    /// A JSON text frame.
    Text(String),
    /// Close the connection gracefully.
    Close,
}

/// Delivery outcome of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was handed to the socket task.
    Delivered,
    /// The connection is gone; the frame was dropped.
    Gone,
}

/// Keeps track of all currently registered connections.
#[derive(Default, Clone)]
pub struct ConnectionRegistry(Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>>);

impl ConnectionRegistry {
    /// Registers a connection's outbound channel.
    pub fn register(&self, connection_id: ConnectionId, sender: mpsc::UnboundedSender<Outbound>) {
        self.0.lock().insert(connection_id, sender);
        ::metrics::gauge!(METRICS_ID_WS_CONNECTIONS_OPEN).increment(1);
    }

    /// Removes a connection. Safe to call twice.
    pub fn remove(&self, connection_id: &ConnectionId) {
        if self.0.lock().remove(connection_id).is_some() {
            ::metrics::gauge!(METRICS_ID_WS_CONNECTIONS_OPEN).decrement(1);
        }
    }

    /// Attempts delivery to a single connection.
    pub fn send(&self, connection_id: &ConnectionId, frame: Outbound) -> Delivery {
        let sender = self.0.lock().get(connection_id).cloned();
        match sender {
            Some(sender) if sender.send(frame).is_ok() => Delivery::Delivered,
            // closed channel means the socket task exited already
            _ => Delivery::Gone,
        }
    }
}
