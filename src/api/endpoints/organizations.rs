//! Organization endpoints.
//!
//! - `GET /api/organizations`: every organization, by name
//! - `POST /api/organizations/check-device`: may this device register under this name?
//! - `GET /api/organizations/:org_id/doctors`: doctor directory (authenticated)

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::device_binding::DeviceCheck;
use crate::models::{DoctorProfile, Organization};

pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<Vec<Organization>>, ApiError> {
    Ok(Json(ctx.core.devices.list_organizations()?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDeviceRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
}

/// 200 when the device may be used, 409 (same body) when it may not.
pub async fn check_device(
    State(ctx): State<ApiContext>,
    Json(request): Json<CheckDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceCheck>), ApiError> {
    let check = ctx.core.devices.check_device(
        request.device_id.as_deref(),
        request.organization_name.as_deref(),
    )?;
    let status = if check.is_conflict() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(check)))
}

pub async fn doctors(
    State(ctx): State<ApiContext>,
    Path(org_id): Path<String>,
) -> Result<Json<Vec<DoctorProfile>>, ApiError> {
    Ok(Json(ctx.core.directory.list_doctors(&org_id)?))
}
