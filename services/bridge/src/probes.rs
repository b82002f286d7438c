//! Connectivity probes behind the diagnostic endpoints.
//!
//! The self-test opens a short-lived live session to verify the upstream
//! service end to end; the remaining probes check the network path one layer
//! at a time (DNS, HTTPS, raw WebSocket).

use crate::config::Config;
use futures_util::{SinkExt, StreamExt};
use gemini_live::{LiveConfig, LiveEvent};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use utoipa::ToSchema;

const LIVE_HOST: &str = "generativelanguage.googleapis.com";
const ECHO_WS_URL: &str = "wss://echo.websocket.org";
const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a failed self-test gave up.
#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelfTestStage {
    /// The session ended before setup completed.
    Connect,
    /// The session reported an error before opening.
    Error,
    /// Setup did not complete within the configured timeout.
    Timeout,
}

/// Outcome of the upstream self-test.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SelfTestReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<SelfTestStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

impl SelfTestReport {
    fn passed(started: Instant) -> Self {
        Self {
            ok: true,
            stage: None,
            detail: None,
            elapsed_ms: elapsed_ms(started),
        }
    }

    fn failed(stage: SelfTestStage, detail: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: false,
            stage: Some(stage),
            detail: Some(detail.into()),
            elapsed_ms: elapsed_ms(started),
        }
    }
}

/// Opens a short-lived, text-only live session and reports whether the
/// service acknowledged setup within the configured timeout. The probe
/// session is released on every path.
pub async fn self_test(config: &Config) -> SelfTestReport {
    let started = Instant::now();
    let Some(api_key) = config.gemini_api_key.as_deref() else {
        return SelfTestReport::failed(SelfTestStage::Connect, "no API key configured", started);
    };

    let (session, mut events) =
        gemini_live::start(LiveConfig::text_only(config.model.clone(), api_key));

    let verdict = tokio::time::timeout(config.connect_timeout, async {
        while let Some(event) = events.recv().await {
            match event {
                LiveEvent::Open => return Ok(()),
                LiveEvent::Error(detail) => return Err((SelfTestStage::Error, detail)),
                LiveEvent::Closed { reason } => {
                    return Err((
                        SelfTestStage::Connect,
                        reason.unwrap_or_else(|| "session closed before setup".to_string()),
                    ));
                }
                LiveEvent::Response(_) => {}
            }
        }
        Err((
            SelfTestStage::Connect,
            "event stream ended before setup".to_string(),
        ))
    })
    .await;

    session.close().await;

    match verdict {
        Ok(Ok(())) => SelfTestReport::passed(started),
        Ok(Err((stage, detail))) => SelfTestReport::failed(stage, detail, started),
        Err(_) => SelfTestReport::failed(
            SelfTestStage::Timeout,
            "live setup did not complete in time",
            started,
        ),
    }
}

/// Outcome of one network-layer probe.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct ProbeResult {
    pub ok: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

impl ProbeResult {
    fn passed(detail: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
            elapsed_ms: elapsed_ms(started),
        }
    }

    fn failed(detail: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            elapsed_ms: elapsed_ms(started),
        }
    }
}

/// Aggregate result of the deep diagnostic suite.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct DiagReport {
    pub dns: ProbeResult,
    pub https: ProbeResult,
    pub ws_echo: ProbeResult,
    pub live: SelfTestReport,
}

impl DiagReport {
    /// True when at least one sub-probe succeeded.
    pub fn any_ok(&self) -> bool {
        self.dns.ok || self.https.ok || self.ws_echo.ok || self.live.ok
    }
}

/// Runs all diagnostic probes concurrently.
pub async fn run_diagnostics(config: &Config) -> DiagReport {
    let (dns, https, ws_echo, live) =
        tokio::join!(dns_probe(), https_probe(), ws_echo_probe(), self_test(config));
    DiagReport {
        dns,
        https,
        ws_echo,
        live,
    }
}

async fn dns_probe() -> ProbeResult {
    let started = Instant::now();
    let result = tokio::time::timeout(
        NETWORK_PROBE_TIMEOUT,
        tokio::net::lookup_host((LIVE_HOST, 443)),
    )
    .await;
    match result {
        Ok(Ok(mut addrs)) => match addrs.next() {
            Some(addr) => ProbeResult::passed(format!("{LIVE_HOST} resolves to {addr}"), started),
            None => ProbeResult::failed(format!("{LIVE_HOST} resolved to no addresses"), started),
        },
        Ok(Err(e)) => ProbeResult::failed(format!("lookup failed: {e}"), started),
        Err(_) => ProbeResult::failed("lookup timed out", started),
    }
}

async fn https_probe() -> ProbeResult {
    let started = Instant::now();
    let client = match reqwest::Client::builder()
        .timeout(NETWORK_PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => return ProbeResult::failed(format!("client build failed: {e}"), started),
    };
    // Any HTTP response at all proves the host is reachable.
    match client.get(format!("https://{LIVE_HOST}/")).send().await {
        Ok(response) => ProbeResult::passed(format!("HTTP {}", response.status()), started),
        Err(e) => ProbeResult::failed(format!("request failed: {e}"), started),
    }
}

async fn ws_echo_probe() -> ProbeResult {
    let started = Instant::now();
    let result = tokio::time::timeout(NETWORK_PROBE_TIMEOUT, async {
        let (mut stream, _) = connect_async(ECHO_WS_URL).await?;
        stream.send(WsMessage::Text("ping".into())).await?;
        let reply = stream.next().await.transpose()?;
        let _ = stream.send(WsMessage::Close(None)).await;
        anyhow::Ok(reply.is_some())
    })
    .await;
    match result {
        Ok(Ok(true)) => ProbeResult::passed("echo endpoint answered", started),
        Ok(Ok(false)) => ProbeResult::failed("echo endpoint closed without answering", started),
        Ok(Err(e)) => ProbeResult::failed(format!("echo probe failed: {e}"), started),
        Err(_) => ProbeResult::failed("echo probe timed out", started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
