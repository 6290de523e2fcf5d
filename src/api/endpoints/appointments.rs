//! Appointment endpoints.
//!
//! Patients create and list their own appointments; doctors list theirs and
//! accept, reject or reschedule them. The caller's role comes from its
//! credential.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthContext};
use crate::appointment::{
    parse_status_filter, AcceptRequest, CreateAppointmentRequest, DoctorScope, RescheduleRequest,
};
use crate::models::{Appointment, Role};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body shared by the three doctor decisions; each reads what it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub doctor_notes: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub alternative_date: Option<String>,
    #[serde(default)]
    pub alternative_time: Option<String>,
}

/// The calling doctor's scope: explicit organization first, then the claimed one.
fn doctor_scope(
    ctx: &ApiContext,
    auth: &AuthContext,
    organization_id: Option<String>,
) -> Result<DoctorScope, ApiError> {
    let assignment = ctx.require_role(auth, Role::Doctor)?;
    Ok(DoctorScope::new(auth.uid.clone())
        .in_organization(organization_id.or(assignment.organization_id)))
}

/// `POST /api/appointments`. Patient requests an appointment.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    ctx.require_role(&auth, Role::Patient)?;
    let appointment = ctx.core.appointments.create(&auth.uid, request)?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// `GET /api/appointments/doctor/me`
pub async fn doctor_list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let status = parse_status_filter(query.status.as_deref())?;
    let scope = doctor_scope(&ctx, &auth, query.organization_id)?;
    Ok(Json(ctx.core.appointments.list_for_doctor(&scope, status)?))
}

/// `GET /api/appointments/patient/me`
pub async fn patient_list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    ctx.require_role(&auth, Role::Patient)?;
    let status = parse_status_filter(query.status.as_deref())?;
    Ok(Json(ctx.core.appointments.list_for_patient(&auth.uid, status)?))
}

/// `PATCH /api/appointments/:id/accept`
pub async fn accept(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Appointment>, ApiError> {
    let scope = doctor_scope(&ctx, &auth, body.organization_id)?;
    let request = AcceptRequest {
        doctor_notes: body.doctor_notes,
        doctor_name: body.doctor_name,
    };
    Ok(Json(ctx.core.appointments.accept(&scope, &id, request)?))
}

/// `PATCH /api/appointments/:id/reject`
pub async fn reject(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Appointment>, ApiError> {
    let scope = doctor_scope(&ctx, &auth, body.organization_id)?;
    Ok(Json(ctx.core.appointments.reject(&scope, &id, body.doctor_notes)?))
}

/// `PATCH /api/appointments/:id/reschedule`
pub async fn reschedule(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Appointment>, ApiError> {
    let scope = doctor_scope(&ctx, &auth, body.organization_id)?;
    let request = RescheduleRequest {
        alternative_date: body.alternative_date,
        alternative_time: body.alternative_time,
        doctor_notes: body.doctor_notes,
    };
    Ok(Json(ctx.core.appointments.reschedule(&scope, &id, request)?))
}
