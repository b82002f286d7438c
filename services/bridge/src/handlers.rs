//! Axum Handlers for the Diagnostic API
//!
//! This module contains the logic for handling the HTTP diagnostic requests.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use crate::{
    models::Healthz,
    probes::{self, DiagReport, SelfTestReport},
    state::AppState,
};

/// Report service liveness and a configuration summary.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is alive", body = Healthz)
    )
)]
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Healthz> {
    Json(Healthz {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.model.clone(),
        has_key: state.config.gemini_api_key.is_some(),
    })
}

/// Open a short-lived upstream session to verify connectivity end to end.
#[utoipa::path(
    get,
    path = "/selftest",
    responses(
        (status = 200, description = "Upstream session opened within the timeout", body = SelfTestReport),
        (status = 500, description = "Upstream session failed to open", body = SelfTestReport)
    )
)]
pub async fn selftest(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = probes::self_test(&state.config).await;
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}

/// Run the full connectivity diagnostic suite.
#[utoipa::path(
    get,
    path = "/diag",
    responses(
        (status = 200, description = "At least one probe succeeded", body = DiagReport),
        (status = 500, description = "Every probe failed", body = DiagReport)
    )
)]
pub async fn diag(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = probes::run_diagnostics(&state.config).await;
    let status = if report.any_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}

/// Fallback for unrecognized paths: a plain-text liveness string.
pub async fn liveness() -> impl IntoResponse {
    (
        StatusCode::OK,
        concat!("live bridge ", env!("CARGO_PKG_VERSION")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use tracing::Level;

    fn app_state(api_key: Option<&str>) -> Arc<AppState> {
        Arc::new(AppState {
            config: Arc::new(Config {
                bind_address: "127.0.0.1:0".parse().expect("socket addr"),
                model: "models/test".to_string(),
                gemini_api_key: api_key.map(String::from),
                connect_timeout: Duration::from_secs(1),
                log_level: Level::INFO,
            }),
        })
    }

    #[tokio::test]
    async fn healthz_reports_key_presence() {
        let Json(body) = healthz(State(app_state(Some("key")))).await;
        assert!(body.ok);
        assert!(body.has_key);
        assert_eq!(body.model, "models/test");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));

        let Json(body) = healthz(State(app_state(None))).await;
        assert!(body.ok);
        assert!(!body.has_key);
    }
}
