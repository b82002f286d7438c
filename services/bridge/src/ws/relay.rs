//! The per-connection relay session state machine.
//!
//! One `RelaySession` mediates between a browser connection and one live
//! session. It buffers client messages until the upstream session opens,
//! translates between the two protocols, and guarantees exactly one teardown
//! no matter which side fails first. All mutation happens from the owning
//! connection task, so the machine needs no internal locking.

use crate::ws::protocol::{ClientMessage, ServerMessage, StatusValue};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use gemini_live::{LiveDirective, LiveEvent, LiveResponse};
use std::collections::VecDeque;
use std::fmt;
use tracing::{info, warn};

/// Consecutive upstream error events tolerated after open before the session
/// is shut down.
const MAX_CONSECUTIVE_LIVE_ERRORS: u32 = 5;

/// Lifecycle of a relay session. Transitions only move forward:
/// `Connecting -> Ready -> Closed` (or straight to `Closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for the upstream session to acknowledge setup.
    Connecting,
    /// Both sides are live; messages flow in both directions.
    Ready,
    /// Terminal. No further sends or callbacks have observable effects.
    Closed,
}

/// Why a session was shut down. Carried into the teardown log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    MissingKey,
    ClientEnd,
    ClientClosed,
    ClientTransport,
    LiveClosed,
    ConnectFailed,
    ConnectTimeout,
    UpstreamTransport,
    RepeatedLiveErrors,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::MissingKey => "no key",
            CloseReason::ClientEnd => "client requested end",
            CloseReason::ClientClosed => "client closed",
            CloseReason::ClientTransport => "client transport error",
            CloseReason::LiveClosed => "live closed",
            CloseReason::ConnectFailed => "connect failed",
            CloseReason::ConnectTimeout => "connect timeout",
            CloseReason::UpstreamTransport => "live send failed",
            CloseReason::RepeatedLiveErrors => "repeated live errors",
        };
        write!(f, "{reason}")
    }
}

/// The relay's view of the upstream session handle.
#[async_trait]
pub trait UpstreamPort: Send {
    async fn send(&mut self, directive: LiveDirective) -> Result<()>;
    /// Best-effort release; implementations swallow close failures.
    async fn close(&mut self);
}

/// The relay's view of the client connection.
#[async_trait]
pub trait DownstreamPort: Send {
    async fn send(&mut self, message: ServerMessage) -> Result<()>;
    /// Best-effort release; implementations swallow close failures.
    async fn close(&mut self);
}

/// State machine for one browser-to-live relay session.
pub struct RelaySession<U, D> {
    state: RelayState,
    pending: VecDeque<ClientMessage>,
    upstream: Option<U>,
    downstream: D,
    error_streak: u32,
}

impl<U: UpstreamPort, D: DownstreamPort> RelaySession<U, D> {
    pub fn new(downstream: D) -> Self {
        Self {
            state: RelayState::Connecting,
            pending: VecDeque::new(),
            upstream: None,
            downstream,
            error_streak: 0,
        }
    }

    /// Attaches the upstream session handle. At most one per relay session.
    pub fn attach_upstream(&mut self, upstream: U) {
        debug_assert!(
            self.upstream.is_none(),
            "upstream session already attached"
        );
        self.upstream = Some(upstream);
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_connecting(&self) -> bool {
        self.state == RelayState::Connecting
    }

    pub fn is_closed(&self) -> bool {
        self.state == RelayState::Closed
    }

    /// Reports a fatal setup problem to the client and closes the session.
    /// Used when the session cannot be established at all (missing
    /// credential, rejected setup).
    pub async fn abort(&mut self, message: impl Into<String>, reason: CloseReason) {
        self.send_down(ServerMessage::error(message)).await;
        self.shutdown(reason).await;
    }

    /// Handles one raw text frame from the client.
    ///
    /// Malformed frames are reported back and otherwise ignored; the session
    /// stays up. `end` closes the session without forwarding anything.
    pub async fn on_client_frame(&mut self, raw: &str) {
        if self.state == RelayState::Closed {
            return;
        }
        let message = match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                self.send_down(ServerMessage::error(format!("invalid message: {e}")))
                    .await;
                return;
            }
        };
        match message {
            ClientMessage::End => self.shutdown(CloseReason::ClientEnd).await,
            message => {
                if self.state == RelayState::Ready {
                    self.forward(message).await;
                } else {
                    self.pending.push_back(message);
                }
            }
        }
    }

    /// Handles one event from the upstream session.
    pub async fn on_upstream_event(&mut self, event: LiveEvent) {
        if self.state == RelayState::Closed {
            return;
        }
        match event {
            LiveEvent::Open => {
                if self.state != RelayState::Connecting {
                    warn!("ignoring duplicate open signal from live session");
                    return;
                }
                self.state = RelayState::Ready;
                self.send_down(ServerMessage::Status {
                    value: StatusValue::Open,
                })
                .await;
                self.drain_pending().await;
            }
            LiveEvent::Response(response) => {
                self.error_streak = 0;
                if let Some(text) = extract_text(&response) {
                    self.send_down(ServerMessage::Text { text }).await;
                }
                if let Some(audio) = extract_audio(&response) {
                    let data = base64::engine::general_purpose::STANDARD.encode(audio);
                    self.send_down(ServerMessage::audio(data)).await;
                }
            }
            LiveEvent::Error(detail) => {
                if self.state == RelayState::Connecting {
                    // Before open, any upstream error is a setup failure.
                    self.send_down(ServerMessage::error(format!("live connect failed: {detail}")))
                        .await;
                    self.shutdown(CloseReason::ConnectFailed).await;
                } else {
                    self.send_down(ServerMessage::error(format!("live error: {detail}")))
                        .await;
                    self.error_streak += 1;
                    if self.error_streak >= MAX_CONSECUTIVE_LIVE_ERRORS {
                        self.shutdown(CloseReason::RepeatedLiveErrors).await;
                    }
                }
            }
            LiveEvent::Closed { reason } => {
                if let Some(reason) = reason {
                    info!(%reason, "live session closed by the service");
                }
                self.send_down(ServerMessage::Status {
                    value: StatusValue::Closed,
                })
                .await;
                self.shutdown(CloseReason::LiveClosed).await;
            }
        }
    }

    /// Fires when the connect timer elapses. A no-op unless the session is
    /// still waiting for upstream open.
    pub async fn on_connect_timeout(&mut self) {
        if self.state != RelayState::Connecting {
            return;
        }
        self.send_down(ServerMessage::error("live connect timed out"))
            .await;
        self.shutdown(CloseReason::ConnectTimeout).await;
    }

    /// Idempotent teardown. The first caller wins; later invocations are
    /// no-ops. Both handles are released best-effort.
    pub async fn shutdown(&mut self, reason: CloseReason) {
        if self.state == RelayState::Closed {
            return;
        }
        self.state = RelayState::Closed;
        self.pending.clear();
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close().await;
        }
        self.downstream.close().await;
        info!(reason = %reason, "relay session closed");
    }

    async fn forward(&mut self, message: ClientMessage) {
        self.drain_pending().await;
        if self.state != RelayState::Ready {
            return;
        }
        if let Some(directive) = translate(message) {
            self.send_up(directive).await;
        }
    }

    /// Drains the queue exactly once, in arrival order. The queue is swapped
    /// out before iteration, so a re-entrant enqueue cannot disturb the drain.
    async fn drain_pending(&mut self) {
        let queued = std::mem::take(&mut self.pending);
        for message in queued {
            if self.state != RelayState::Ready {
                break;
            }
            if let Some(directive) = translate(message) {
                self.send_up(directive).await;
            }
        }
    }

    async fn send_up(&mut self, directive: LiveDirective) {
        let result = match self.upstream.as_mut() {
            Some(upstream) => upstream.send(directive).await,
            None => {
                warn!("dropping directive: no upstream session attached");
                return;
            }
        };
        if let Err(e) = result {
            self.send_down(ServerMessage::error(format!("live send failed: {e}")))
                .await;
            self.shutdown(CloseReason::UpstreamTransport).await;
        }
    }

    async fn send_down(&mut self, message: ServerMessage) {
        if self.state == RelayState::Closed {
            return;
        }
        if let Err(e) = self.downstream.send(message).await {
            warn!(error = %e, "failed to send to client");
            self.shutdown(CloseReason::ClientTransport).await;
        }
    }
}

/// Translates a client message into an upstream directive. `end` never
/// reaches this point; it is handled before queueing.
fn translate(message: ClientMessage) -> Option<LiveDirective> {
    match message {
        ClientMessage::Setup { system_instruction } => {
            Some(LiveDirective::SystemInstruction(system_instruction))
        }
        ClientMessage::Text { text } => Some(LiveDirective::TextInput(text)),
        ClientMessage::End => None,
    }
}

/// Picks the text payload of a response: model-turn parts first, then the
/// output transcription. The first non-empty source wins.
fn extract_text(response: &LiveResponse) -> Option<String> {
    let joined: String = response
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect();
    if !joined.is_empty() {
        return Some(joined);
    }
    response
        .transcription
        .clone()
        .filter(|text| !text.is_empty())
}

/// Concatenates the binary audio payloads of a response, if any.
fn extract_audio(response: &LiveResponse) -> Option<Vec<u8>> {
    let mut audio = Vec::new();
    for part in &response.parts {
        if let Some(bytes) = &part.audio {
            audio.extend_from_slice(bytes);
        }
    }
    (!audio.is_empty()).then_some(audio)
}
