//! Manages the WebSocket connection lifecycle for a relay session.
//!
//! The handler upgrades the HTTP connection, wires the socket and the live
//! session into a [`RelaySession`], and drives the machine from a single
//! `select!` loop until it reaches the closed state.

use super::{
    protocol::ServerMessage,
    relay::{CloseReason, DownstreamPort, RelaySession, UpstreamPort},
};
use crate::state::AppState;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use gemini_live::{LiveConfig, LiveDirective, LiveSession};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new client connection.
#[instrument(name = "relay_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", session_id.to_string());
    info!("new client connection");

    let (socket_tx, socket_rx) = socket.split();
    let relay = RelaySession::new(ClientSink { sink: socket_tx });

    run_relay(relay, socket_rx, state).await;
    info!("relay session finished");
}

/// Drives one relay session to completion.
async fn run_relay(
    mut relay: RelaySession<LiveLink, ClientSink>,
    mut socket_rx: SplitStream<WebSocket>,
    state: Arc<AppState>,
) {
    // Without a credential there is nothing to relay to; the client gets one
    // error and the connection is closed. No upstream session is attempted.
    let Some(api_key) = state.config.gemini_api_key.clone() else {
        relay
            .abort("no live API key configured", CloseReason::MissingKey)
            .await;
        return;
    };

    let live_config = LiveConfig::new(state.config.model.clone(), api_key);
    let (live, mut live_events) = gemini_live::start(live_config);
    relay.attach_upstream(LiveLink { session: live });

    let connect_deadline = tokio::time::sleep(state.config.connect_timeout);
    tokio::pin!(connect_deadline);

    while !relay.is_closed() {
        tokio::select! {
            // Polled only while connecting; reaching Ready cancels the timer.
            _ = &mut connect_deadline, if relay.is_connecting() => {
                relay.on_connect_timeout().await;
            }
            event = live_events.recv() => match event {
                Some(event) => relay.on_upstream_event(event).await,
                None => relay.shutdown(CloseReason::LiveClosed).await,
            },
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.on_client_frame(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => {
                    relay.shutdown(CloseReason::ClientClosed).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("ignoring binary frame from client");
                }
                // Pings are answered by the transport itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    error!(error = %e, "client transport failed");
                    relay.shutdown(CloseReason::ClientTransport).await;
                }
            },
        }
    }
}

/// Adapter: the live session handle as the relay's upstream port.
struct LiveLink {
    session: LiveSession,
}

#[async_trait]
impl UpstreamPort for LiveLink {
    async fn send(&mut self, directive: LiveDirective) -> Result<()> {
        self.session.send(directive).await.map_err(Into::into)
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}

/// Adapter: the client-facing socket sink as the relay's downstream port.
struct ClientSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl DownstreamPort for ClientSink {
    async fn send(&mut self, message: ServerMessage) -> Result<()> {
        let serialized = serde_json::to_string(&message)?;
        self.sink.send(Message::Text(serialized.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        // The peer may already be gone; a failed close frame is fine.
        let _ = self.sink.send(Message::Close(None)).await;
    }
}
