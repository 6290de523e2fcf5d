//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// `GET /api/health`. Liveness check.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        uptime_secs: ctx.core.uptime_secs(),
    })
}
