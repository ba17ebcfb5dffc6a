//! The WebSocket endpoint.
//!
//! The upgrade itself carries no state (`$connect`). Afterwards the socket
//! task owns both directions: client frames (`auth`, `pingRequest`,
//! anything else logged) and the outbound channel that the push fabric
//! writes to. Authentication binds the connection to a driver by saving the
//! durable connection record; socket close (`$disconnect`) only drops the
//! in-process sender — the record is reaped on the next gone delivery.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tracing::instrument;

use pitwall_types::{
    ConnectionId, DriverId,
    ws::{AuthPayload, AuthResponsePayload, ClientEnvelope, WsConnection, actions},
};

use crate::{AppState, services::connections::Outbound};

/// `GET /ws` — upgrades the connection.
pub(crate) async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.ws_max_message_size)
        .on_failed_upgrade(|err| {
            tracing::warn!("could not establish websocket connection: {err:?}");
        })
        .on_upgrade(move |socket| handle_socket(state, socket))
}

/// The whole life-cycle of one connection.
#[instrument(level = "debug", skip_all, fields(connection_id = tracing::field::Empty))]
async fn handle_socket(state: AppState, socket: WebSocket) {
    let connection_id = ConnectionId::random();
    tracing::Span::current().record("connection_id", tracing::field::display(&connection_id));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    state.registry.register(connection_id.clone(), outbound_tx);
    tracing::debug!("websocket connected");

    let (mut sink, mut stream) = socket.split();
    let mut authed_driver: Option<DriverId> = None;
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(frame)) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    // best-effort closing handshake
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &connection_id, &mut authed_driver, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!("websocket receive error: {err:?}");
                    break;
                }
            },
        }
    }

    state.registry.remove(&connection_id);
    // the durable record (if authenticated) stays; gone-delivery reaps it
    tracing::debug!("websocket disconnected (driver {authed_driver:?})");
}

/// Dispatches one client frame by its action.
async fn handle_frame(
    state: &AppState,
    connection_id: &ConnectionId,
    authed_driver: &mut Option<DriverId>,
    text: &str,
) {
    let frame: ClientEnvelope = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!("unparseable websocket frame: {err}");
            return;
        }
    };
    match frame.action.as_str() {
        actions::AUTH => handle_auth(state, connection_id, authed_driver, frame.payload).await,
        actions::PING_REQUEST => {
            let _ = state
                .push
                .push(connection_id, actions::PING_RESPONSE, serde_json::json!({}));
        }
        other => tracing::debug!("no route for websocket action {other:?}"),
    }
}

/// Validates the token and binds the connection to the driver.
///
/// On failure the response is sent first, then the connection is explicitly
/// disconnected.
async fn handle_auth(
    state: &AppState,
    connection_id: &ConnectionId,
    authed_driver: &mut Option<DriverId>,
    payload: Option<Box<RawValue>>,
) {
    let token = payload
        .as_deref()
        .and_then(|raw| serde_json::from_str::<AuthPayload>(raw.get()).ok())
        .map(|payload| payload.token);
    let session = match token {
        Some(token) => state.tokens.validate_token(&token).await.ok(),
        None => None,
    };

    let Some(session) = session else {
        let _ = state.push.push(
            connection_id,
            actions::AUTH_RESPONSE,
            AuthResponsePayload {
                success: false,
                user_id: None,
                connection_id: None,
            },
        );
        state.push.disconnect(connection_id);
        return;
    };

    let driver_id = session.claims.ir_uid;
    let record = WsConnection {
        driver_id,
        connection_id: connection_id.clone(),
        created_at: Utc::now(),
    };
    if let Err(err) = state.store.save_connection(&record).await {
        tracing::error!("could not save connection record: {err:?}");
        let _ = state.push.push(
            connection_id,
            actions::AUTH_RESPONSE,
            AuthResponsePayload {
                success: false,
                user_id: None,
                connection_id: None,
            },
        );
        state.push.disconnect(connection_id);
        return;
    }

    *authed_driver = Some(driver_id);
    tracing::debug!("websocket authenticated as driver {driver_id}");
    let _ = state.push.push(
        connection_id,
        actions::AUTH_RESPONSE,
        AuthResponsePayload {
            success: true,
            user_id: Some(driver_id),
            connection_id: Some(connection_id.clone()),
        },
    );
}
