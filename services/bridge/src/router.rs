//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the diagnostic API, the WebSocket endpoint, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::Healthz,
    probes::{DiagReport, ProbeResult, SelfTestReport, SelfTestStage},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::healthz, handlers::selftest, handlers::diag),
    components(
        schemas(Healthz, SelfTestReport, SelfTestStage, DiagReport, ProbeResult)
    ),
    tags(
        (name = "Live Bridge API", description = "Diagnostics for the browser-to-live relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router. Anything
    // that is not a recognized route answers with the liveness fallback.
    let api_router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/selftest", get(handlers::selftest))
        .route("/diag", get(handlers::diag))
        .route("/ws", get(ws_handler))
        .fallback(handlers::liveness)
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
