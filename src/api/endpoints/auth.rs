//! Registration and sign-in endpoints. All unprotected.
//!
//! - `POST /api/auth/register/doctor`
//! - `POST /api/auth/register/patient`
//! - `POST /api/auth/token`: email + password → bearer token
//! - `POST /api/auth/login`: bearer token → role and organization

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::registration::{DoctorRegistration, PatientRegistration, RegisteredUser};

pub async fn register_doctor(
    State(ctx): State<ApiContext>,
    Json(request): Json<DoctorRegistration>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let user = ctx.core.registration.register_doctor(request)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn register_patient(
    State(ctx): State<ApiContext>,
    Json(request): Json<PatientRegistration>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let user = ctx.core.registration.register_patient(request)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
}

pub async fn token(
    State(ctx): State<ApiContext>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = ctx
        .core
        .registration
        .sign_in(request.email.as_deref(), request.password.as_deref())?;
    Ok(Json(TokenResponse {
        token,
        token_type: "Bearer",
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub id_token: Option<String>,
}

pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<RegisteredUser>, ApiError> {
    let user = ctx.core.registration.login(request.id_token.as_deref())?;
    Ok(Json(user))
}
