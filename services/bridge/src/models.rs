//! API Models
//!
//! Response bodies for the diagnostic endpoints, annotated for OpenAPI
//! generation with `utoipa`.

use serde::Serialize;
use utoipa::ToSchema;

/// Liveness and configuration summary returned by `/healthz`.
#[derive(Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Healthz {
    pub ok: bool,
    #[schema(example = "0.1.0")]
    pub version: String,
    #[schema(example = "models/gemini-2.0-flash-exp")]
    pub model: String,
    pub has_key: bool,
}
