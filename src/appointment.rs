//! Appointment lifecycle.
//!
//! A patient proposes an appointment with a doctor; the doctor accepts,
//! rejects or reschedules it. Appointments live under the doctor's profile
//! inside its organization, so every doctor-side call first works out which
//! organization that is.
//!
//! Transitions are permissive: a processed appointment can be processed
//! again, and the last write wins.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{
    decode, encode, merge_documents, DatabaseError, Direction, DocPath, Document, DocumentStore,
    Query, StoredDocument,
};
use crate::error::{require, ServiceError};
use crate::models::collections::APPOINTMENTS;
use crate::models::{paths, Appointment, AppointmentStatus, PatientSnapshot};
use crate::role_resolver::RoleResolver;

/// Stamped on an accepted appointment when no doctor name can be found.
pub const UNKNOWN_DOCTOR_LABEL: &str = "Doctor asignado";

/// Fields that have named the patient on appointment documents over time.
const PATIENT_ID_ALIASES: [&str; 4] = ["/patientId", "/patientUid", "/pacienteId", "/patient/uid"];

// ── Requests ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub requested_date: Option<String>,
    #[serde(default)]
    pub requested_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The doctor acting on appointments, and optionally the organization.
/// Without one, the organization is resolved from the doctor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorScope {
    pub doctor_id: String,
    pub organization_id: Option<String>,
}

impl DoctorScope {
    pub fn new(doctor_id: impl Into<String>) -> Self {
        Self {
            doctor_id: doctor_id.into(),
            organization_id: None,
        }
    }

    pub fn in_organization(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id.filter(|id| !id.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    #[serde(default)]
    pub doctor_notes: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    #[serde(default)]
    pub alternative_date: Option<String>,
    #[serde(default)]
    pub alternative_time: Option<String>,
    #[serde(default)]
    pub doctor_notes: Option<String>,
}

/// `None`, empty or `"all"` means no filter.
pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<AppointmentStatus>, ServiceError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => s
            .parse::<AppointmentStatus>()
            .map(Some)
            .map_err(|_| ServiceError::Validation(format!("Unknown appointment status: {s}"))),
    }
}

/// Patient referenced by a stored appointment, whichever field names it.
pub fn referenced_patient(doc: &Document) -> Option<String> {
    let body = Value::Object(doc.clone());
    PATIENT_ID_ALIASES.iter().find_map(|pointer| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}

/// Decode a stored appointment, filling what older documents leave out.
///
/// The id, organization and doctor come from the path; the patient from any
/// of its aliases. A missing `createdAt` or `updatedAt` takes the other.
pub fn read_appointment(path: &DocPath, mut doc: Document) -> Result<Appointment, DatabaseError> {
    let from_path = [
        ("id", Some(path.id())),
        ("organizationId", path.segment(1)),
        ("doctorId", path.segment(3)),
    ];
    for (field, value) in from_path {
        if let Some(value) = value {
            doc.entry(field).or_insert_with(|| json!(value));
        }
    }
    if !doc.contains_key("patientId") {
        if let Some(patient_id) = referenced_patient(&doc) {
            doc.insert("patientId".into(), json!(patient_id));
        }
    }
    match (doc.get("createdAt").cloned(), doc.get("updatedAt").cloned()) {
        (Some(created), None) => {
            doc.insert("updatedAt".into(), created);
        }
        (None, Some(updated)) => {
            doc.insert("createdAt".into(), updated);
        }
        _ => {}
    }
    decode(doc)
}

/// Readable appointments, in store order. Unreadable ones are logged and skipped.
fn read_listing(docs: Vec<StoredDocument>) -> Vec<Appointment> {
    docs.into_iter()
        .filter_map(|stored| {
            let path = stored.path.to_string();
            match read_appointment(&stored.path, stored.data) {
                Ok(appointment) => Some(appointment),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Skipping unreadable appointment");
                    None
                }
            }
        })
        .collect()
}

fn status_query(status: Option<AppointmentStatus>) -> Query {
    let query = match status {
        Some(status) => Query::new().where_eq("status", status.as_str()),
        None => Query::new(),
    };
    query.order_by("createdAt", Direction::Descending)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ═══════════════════════════════════════════════════════════
// AppointmentService
// ═══════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn DocumentStore>,
    resolver: RoleResolver,
}

impl AppointmentService {
    pub fn new(store: Arc<dyn DocumentStore>, resolver: RoleResolver) -> Self {
        Self { store, resolver }
    }

    fn organization_for(&self, scope: &DoctorScope) -> Result<String, ServiceError> {
        match &scope.organization_id {
            Some(org_id) => Ok(org_id.clone()),
            None => self.resolver.doctor_organization(&scope.doctor_id),
        }
    }

    /// Patient-initiated. The new appointment is `pending`.
    pub fn create(
        &self,
        patient_id: &str,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, ServiceError> {
        let doctor_id = require(request.doctor_id.as_deref(), "doctorId")?;
        let requested_date = require(request.requested_date.as_deref(), "requestedDate")?;
        let requested_time = require(request.requested_time.as_deref(), "requestedTime")?;

        let organization_id = self.organization_for(
            &DoctorScope::new(doctor_id).in_organization(request.organization_id.clone()),
        )?;

        let patient = self
            .store
            .get(&paths::patient(patient_id)?)?
            .ok_or_else(|| ServiceError::NotFound(format!("Patient {patient_id} does not exist")))?;
        if self
            .store
            .get(&paths::doctor(&organization_id, doctor_id)?)?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Doctor {doctor_id} not found in organization {organization_id}"
            )));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.clone(),
            doctor_id: doctor_id.to_string(),
            patient_id: patient_id.to_string(),
            patient_snapshot: PatientSnapshot::from_patient_document(&patient),
            requested_date: requested_date.to_string(),
            requested_time: requested_time.to_string(),
            reason: non_blank(request.reason),
            status: AppointmentStatus::Pending,
            doctor_response: String::new(),
            alternative_date: String::new(),
            alternative_time: String::new(),
            doctor_name: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };

        let path = paths::appointment(&organization_id, doctor_id, &appointment.id)?;
        if !self.store.create(&path, encode(&appointment)?)? {
            return Err(ServiceError::Conflict(format!(
                "Appointment {} already exists",
                appointment.id
            )));
        }
        tracing::info!(
            appointment_id = %appointment.id,
            organization_id = %organization_id,
            doctor_id = %doctor_id,
            patient_id = %patient_id,
            "Appointment requested"
        );
        Ok(appointment)
    }

    /// Newest first.
    pub fn list_for_doctor(
        &self,
        scope: &DoctorScope,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, ServiceError> {
        let organization_id = self.organization_for(scope)?;
        let collection = paths::doctor_appointments(&organization_id, &scope.doctor_id)?;
        let docs = self.store.query(&collection, &status_query(status))?;
        Ok(read_listing(docs))
    }

    /// Every appointment of `patient_id`, whatever doctor or organization holds it. Newest first.
    pub fn list_for_patient(
        &self,
        patient_id: &str,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, ServiceError> {
        let patient_id = require(Some(patient_id), "patientId")?;
        let query = status_query(status).where_eq("patientId", patient_id);
        let docs = self.store.collection_group(APPOINTMENTS, &query)?;
        Ok(read_listing(docs))
    }

    pub fn get(&self, scope: &DoctorScope, appointment_id: &str) -> Result<Appointment, ServiceError> {
        let organization_id = self.organization_for(scope)?;
        let path = paths::appointment(&organization_id, &scope.doctor_id, appointment_id)?;
        let doc = self.store.get(&path)?.ok_or_else(|| not_found(appointment_id))?;
        Ok(read_appointment(&path, doc)?)
    }

    /// Accept, stamp the doctor's name, and record it on the patient.
    pub fn accept(
        &self,
        scope: &DoctorScope,
        appointment_id: &str,
        request: AcceptRequest,
    ) -> Result<Appointment, ServiceError> {
        let organization_id = self.organization_for(scope)?;
        let doctor_name = match non_blank(request.doctor_name) {
            Some(name) => name,
            None => self.doctor_display_name(&organization_id, &scope.doctor_id),
        };

        let now = Utc::now();
        let patch = json!({
            "status": AppointmentStatus::Accepted.as_str(),
            "doctorResponse": request.doctor_notes.unwrap_or_default(),
            "processedAt": now,
            "doctorId": scope.doctor_id,
            "doctorName": doctor_name,
        });
        let (path, stored) = self.apply(&organization_id, &scope.doctor_id, appointment_id, patch)?;
        tracing::info!(appointment_id = %appointment_id, doctor_id = %scope.doctor_id, "Appointment accepted");

        self.link_patient(appointment_id, &stored, &doctor_name);
        Ok(read_appointment(&path, stored)?)
    }

    pub fn reject(
        &self,
        scope: &DoctorScope,
        appointment_id: &str,
        doctor_notes: Option<String>,
    ) -> Result<Appointment, ServiceError> {
        let organization_id = self.organization_for(scope)?;
        let patch = json!({
            "status": AppointmentStatus::Rejected.as_str(),
            "doctorResponse": doctor_notes.unwrap_or_default(),
            "processedAt": Utc::now(),
        });
        let (path, stored) = self.apply(&organization_id, &scope.doctor_id, appointment_id, patch)?;
        tracing::info!(appointment_id = %appointment_id, doctor_id = %scope.doctor_id, "Appointment rejected");
        Ok(read_appointment(&path, stored)?)
    }

    /// Propose another slot. Both alternative fields are checked before anything is read or written.
    pub fn reschedule(
        &self,
        scope: &DoctorScope,
        appointment_id: &str,
        request: RescheduleRequest,
    ) -> Result<Appointment, ServiceError> {
        let alternative_date = require(request.alternative_date.as_deref(), "alternativeDate")?;
        let alternative_time = require(request.alternative_time.as_deref(), "alternativeTime")?;

        let organization_id = self.organization_for(scope)?;
        let patch = json!({
            "status": AppointmentStatus::Rescheduled.as_str(),
            "alternativeDate": alternative_date,
            "alternativeTime": alternative_time,
            "doctorResponse": request.doctor_notes.unwrap_or_default(),
            "processedAt": Utc::now(),
        });
        let (path, stored) = self.apply(&organization_id, &scope.doctor_id, appointment_id, patch)?;
        tracing::info!(appointment_id = %appointment_id, doctor_id = %scope.doctor_id, "Appointment rescheduled");
        Ok(read_appointment(&path, stored)?)
    }

    /// Merge `patch` into an existing appointment; absent appointments stay absent.
    fn apply(
        &self,
        organization_id: &str,
        doctor_id: &str,
        appointment_id: &str,
        patch: Value,
    ) -> Result<(DocPath, Document), ServiceError> {
        let path = paths::appointment(organization_id, doctor_id, appointment_id)?;
        let mut patch = match patch {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        patch.insert("updatedAt".into(), json!(Utc::now()));

        let stored = self.store.modify(&path, &mut |current| {
            let mut doc = current?;
            merge_documents(&mut doc, patch.clone());
            Some(doc)
        })?;
        let stored = stored.ok_or_else(|| not_found(appointment_id))?;
        Ok((path, stored))
    }

    fn doctor_display_name(&self, organization_id: &str, doctor_id: &str) -> String {
        let profile = paths::doctor(organization_id, doctor_id).and_then(|path| self.store.get(&path));
        match profile {
            Ok(Some(doc)) => ["displayName", "name"]
                .iter()
                .find_map(|field| doc.get(*field).and_then(Value::as_str))
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN_DOCTOR_LABEL.to_string()),
            Ok(None) => UNKNOWN_DOCTOR_LABEL.to_string(),
            Err(e) => {
                tracing::warn!(doctor_id = %doctor_id, error = %e, "Doctor profile unreadable, using placeholder name");
                UNKNOWN_DOCTOR_LABEL.to_string()
            }
        }
    }

    /// Best effort: never fails the accept.
    fn link_patient(&self, appointment_id: &str, appointment: &Document, doctor_name: &str) {
        let Some(patient_id) = referenced_patient(appointment) else {
            tracing::warn!(appointment_id = %appointment_id, "Appointment names no patient, skipping doctor link");
            return;
        };

        let result = paths::patient(&patient_id).and_then(|path| {
            self.store.modify(&path, &mut |current| {
                let mut doc = current?;
                doc.insert("assignedDoctorName".into(), json!(doctor_name));
                Some(doc)
            })
        });
        match result {
            Ok(Some(_)) => {
                tracing::info!(patient_id = %patient_id, appointment_id = %appointment_id, "Assigned doctor recorded on patient");
            }
            Ok(None) => {
                tracing::warn!(patient_id = %patient_id, appointment_id = %appointment_id, "Patient record missing, skipping doctor link");
            }
            Err(e) => {
                tracing::warn!(patient_id = %patient_id, error = %e, "Failed to record assigned doctor on patient");
            }
        }
    }
}

fn not_found(appointment_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("Appointment {appointment_id} not found"))
}
