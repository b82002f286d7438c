//! Channel-based session client.
//!
//! [`start`] spawns a background task that owns the WebSocket to the live
//! service. Directives flow in over a command channel, events flow out over
//! an event channel; the caller never touches the transport directly.

use crate::config::{LiveConfig, pcm_mime};
use crate::wire;
use base64::Engine;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::ops::ControlFlow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

pub(crate) const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// A structured instruction submitted to an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveDirective {
    /// Replace the session's system instruction.
    SystemInstruction(String),
    /// Submit user text input for the model to respond to.
    TextInput(String),
}

/// An event delivered by the session's background task.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The service acknowledged setup; the session accepts directives now.
    Open,
    /// A structured response from the model.
    Response(LiveResponse),
    /// A transport or protocol failure. Terminal failures are followed by
    /// [`LiveEvent::Closed`].
    Error(String),
    /// The session ended, either by the service or because the transport
    /// dropped.
    Closed { reason: Option<String> },
}

/// A structured model response, with inline audio already decoded to bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveResponse {
    pub parts: Vec<ResponsePart>,
    pub transcription: Option<String>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponsePart {
    pub text: Option<String>,
    pub audio: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("live session is closed")]
    SessionClosed,
}

#[derive(Debug)]
enum Command {
    Directive(LiveDirective),
    Close,
}

/// Handle to a running live session.
///
/// Dropping the handle closes the command channel, which makes the background
/// task shut the transport down on its own.
pub struct LiveSession {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl LiveSession {
    /// Submits a directive to the session.
    pub async fn send(&self, directive: LiveDirective) -> Result<(), LiveError> {
        self.commands
            .send(Command::Directive(directive))
            .await
            .map_err(|_| LiveError::SessionClosed)
    }

    /// Best-effort close. The background task sends a close frame and exits;
    /// if it is already gone the task handle is aborted as a fallback.
    pub async fn close(&self) {
        if self.commands.send(Command::Close).await.is_err() {
            self.task.abort();
        }
    }
}

/// Opens a live session.
///
/// Returns immediately; connection and setup happen on a background task.
/// Success is signaled by [`LiveEvent::Open`] on the returned receiver, and
/// failures by [`LiveEvent::Error`] / [`LiveEvent::Closed`].
pub fn start(config: LiveConfig) -> (LiveSession, mpsc::Receiver<LiveEvent>) {
    let (command_tx, command_rx) = mpsc::channel(128);
    let (event_tx, event_rx) = mpsc::channel(128);
    let task = tokio::spawn(run(config, command_rx, event_tx));
    (
        LiveSession {
            commands: command_tx,
            task,
        },
        event_rx,
    )
}

type LiveSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

async fn run(
    config: LiveConfig,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<LiveEvent>,
) {
    let url = endpoint_url(&config);
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events
                .send(LiveEvent::Error(format!("connect failed: {e}")))
                .await;
            let _ = events.send(LiveEvent::Closed { reason: None }).await;
            return;
        }
    };
    let (mut live_tx, mut live_rx) = ws_stream.split();

    if let Err(e) = send_frame(&mut live_tx, &wire::OutboundFrame::Setup(setup_frame(&config))).await
    {
        let _ = events
            .send(LiveEvent::Error(format!("setup send failed: {e}")))
            .await;
        let _ = events.send(LiveEvent::Closed { reason: None }).await;
        return;
    }
    info!(model = %config.model, "live transport connected, awaiting setup acknowledgement");

    let mut ready = false;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Directive(directive)) => {
                    if !ready {
                        warn!("dropping directive issued before live setup completed");
                        continue;
                    }
                    if let Err(e) = send_frame(&mut live_tx, &directive_frame(directive)).await {
                        let _ = events.send(LiveEvent::Error(format!("live send failed: {e}"))).await;
                        let _ = events.send(LiveEvent::Closed { reason: None }).await;
                        break;
                    }
                }
                Some(Command::Close) | None => break,
            },
            frame = live_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if dispatch_inbound(&text, &mut ready, &events).await.is_break() {
                        break;
                    }
                }
                // The service intermittently delivers its JSON frames as
                // binary messages; treat them the same as text.
                Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        if dispatch_inbound(text, &mut ready, &events).await.is_break() {
                            break;
                        }
                    }
                    Err(_) => warn!("ignoring non-UTF-8 binary frame from live service"),
                },
                Some(Ok(WsMessage::Close(close_frame))) => {
                    let reason = close_frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    let _ = events.send(LiveEvent::Closed { reason }).await;
                    break;
                }
                // Pings are answered by the transport itself.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    let _ = events.send(LiveEvent::Error(format!("live read failed: {e}"))).await;
                    let _ = events.send(LiveEvent::Closed { reason: None }).await;
                    break;
                }
                None => {
                    let _ = events.send(LiveEvent::Closed { reason: None }).await;
                    break;
                }
            },
        }
    }

    let _ = live_tx.send(WsMessage::Close(None)).await;
    debug!("live session task finished");
}

/// Routes one inbound JSON frame to the event channel. Breaks when the event
/// receiver is gone, which tells the task loop to stop.
async fn dispatch_inbound(
    text: &str,
    ready: &mut bool,
    events: &mpsc::Sender<LiveEvent>,
) -> ControlFlow<()> {
    let frame: wire::InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized live frame");
            return ControlFlow::Continue(());
        }
    };

    if frame.setup_complete.is_some() {
        if *ready {
            warn!("duplicate setup acknowledgement from live service");
        } else {
            *ready = true;
            info!("live session setup complete");
            if events.send(LiveEvent::Open).await.is_err() {
                return ControlFlow::Break(());
            }
        }
    }
    if let Some(update) = frame.session_resumption_update {
        debug!(resumable = ?update.resumable, handle = ?update.new_handle, "session resumption handle updated");
    }
    if let Some(go_away) = frame.go_away {
        warn!(time_left = ?go_away.time_left, "live service announced impending disconnect");
    }
    if let Some(content) = frame.server_content {
        let response = response_from_content(content);
        if events.send(LiveEvent::Response(response)).await.is_err() {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

fn response_from_content(content: wire::ServerContent) -> LiveResponse {
    let parts = content
        .model_turn
        .map(|turn| {
            turn.parts
                .into_iter()
                .map(|part| ResponsePart {
                    text: part.text,
                    audio: part.inline_data.and_then(|blob| decode_audio(&blob.data)),
                })
                .collect()
        })
        .unwrap_or_default();
    LiveResponse {
        parts,
        transcription: content.output_transcription.map(|t| t.text),
        turn_complete: content.turn_complete.unwrap_or(false),
    }
}

fn decode_audio(data: &str) -> Option<Vec<u8>> {
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "failed to decode inline audio payload");
            None
        }
    }
}

fn setup_frame(config: &LiveConfig) -> wire::Setup {
    let wants_audio = config
        .response_modalities
        .contains(&crate::config::ResponseModality::Audio);
    wire::Setup {
        model: config.model.clone(),
        generation_config: wire::GenerationConfig {
            response_modalities: config.response_modalities.clone(),
        },
        input_audio: Some(wire::AudioFormat {
            mime_type: pcm_mime(config.input_sample_rate),
        }),
        output_audio: wants_audio.then(|| wire::AudioFormat {
            mime_type: pcm_mime(config.output_sample_rate),
        }),
        session_resumption: config.session_resumption.then(wire::SessionResumption::default),
        proactivity: Some(wire::Proactivity {
            proactive_audio: config.proactive_audio,
        }),
        output_audio_transcription: wants_audio.then(wire::Empty::default),
    }
}

fn directive_frame(directive: LiveDirective) -> wire::OutboundFrame {
    let (role, text, turn_complete) = match directive {
        // A system instruction amends the session without closing the turn.
        LiveDirective::SystemInstruction(text) => ("system", text, false),
        LiveDirective::TextInput(text) => ("user", text, true),
    };
    wire::OutboundFrame::ClientContent(wire::ClientContent {
        turns: vec![wire::Content {
            role: role.to_string(),
            parts: vec![wire::Part { text }],
        }],
        turn_complete,
    })
}

async fn send_frame(sink: &mut LiveSink, frame: &wire::OutboundFrame) -> anyhow::Result<()> {
    let payload = serde_json::to_string(frame)?;
    sink.send(WsMessage::Text(payload.into())).await?;
    Ok(())
}

fn endpoint_url(config: &LiveConfig) -> String {
    format!("{LIVE_ENDPOINT}?key={}", config.api_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_url_carries_key() {
        let config = LiveConfig::new("models/test", "secret-key");
        let url = endpoint_url(&config);
        assert!(url.starts_with("wss://generativelanguage.googleapis.com/"));
        assert!(url.ends_with("?key=secret-key"));
    }

    #[test]
    fn system_instruction_keeps_turn_open() {
        let frame = directive_frame(LiveDirective::SystemInstruction("be brief".to_string()));
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(
            value,
            json!({
                "clientContent": {
                    "turns": [{ "role": "system", "parts": [{ "text": "be brief" }] }],
                    "turnComplete": false,
                }
            })
        );
    }

    #[test]
    fn text_input_completes_turn() {
        let frame = directive_frame(LiveDirective::TextInput("hello".to_string()));
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(
            value,
            json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": "hello" }] }],
                    "turnComplete": true,
                }
            })
        );
    }

    #[test]
    fn text_only_setup_omits_audio_sections() {
        let setup = setup_frame(&LiveConfig::text_only("models/test", "key"));
        assert!(setup.output_audio.is_none());
        assert!(setup.output_audio_transcription.is_none());
        assert!(setup.session_resumption.is_none());
    }

    #[test]
    fn default_setup_enables_resumption_and_disables_proactivity() {
        let setup = setup_frame(&LiveConfig::new("models/test", "key"));
        assert!(setup.session_resumption.is_some());
        assert!(setup.output_audio.is_some());
        assert_eq!(setup.proactivity.map(|p| p.proactive_audio), Some(false));
    }

    #[tokio::test]
    async fn setup_complete_emits_open_once() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let mut ready = false;

        let flow = dispatch_inbound(r#"{"setupComplete": {}}"#, &mut ready, &events_tx).await;
        assert!(flow.is_continue());
        assert!(ready);
        assert_eq!(events_rx.recv().await, Some(LiveEvent::Open));

        // A duplicate acknowledgement must not produce a second Open.
        let flow = dispatch_inbound(r#"{"setupComplete": {}}"#, &mut ready, &events_tx).await;
        assert!(flow.is_continue());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_content_emits_response() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let mut ready = true;
        let raw = json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "text": "hi" }] },
                "turnComplete": true,
            }
        })
        .to_string();

        let flow = dispatch_inbound(&raw, &mut ready, &events_tx).await;
        assert!(flow.is_continue());
        match events_rx.recv().await {
            Some(LiveEvent::Response(response)) => {
                assert_eq!(response.parts.len(), 1);
                assert_eq!(response.parts[0].text.as_deref(), Some("hi"));
                assert!(response.turn_complete);
            }
            other => panic!("expected response event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_frames_are_ignored() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let mut ready = true;

        let flow = dispatch_inbound("not json", &mut ready, &events_tx).await;
        assert!(flow.is_continue());
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn inline_audio_is_decoded() {
        let content: wire::ServerContent = serde_json::from_value(json!({
            "modelTurn": {
                "parts": [{ "inlineData": { "data": "AQID" } }]
            }
        }))
        .expect("parse");

        let response = response_from_content(content);
        assert_eq!(response.parts[0].audio.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(response.parts[0].text.is_none());
    }
}
