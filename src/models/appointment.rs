use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::AppointmentStatus;
use crate::db::Document;

/// Stored at `organizations/{orgId}/doctors/{doctorId}/appointments/{id}`.
///
/// Older documents may lack the identifying fields and the snapshot; the
/// appointment service fills those in from the document path when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub organization_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub patient_snapshot: PatientSnapshot,
    #[serde(default)]
    pub requested_date: String,
    #[serde(default)]
    pub requested_time: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub doctor_response: String,
    #[serde(default)]
    pub alternative_date: String,
    #[serde(default)]
    pub alternative_time: String,
    #[serde(default)]
    pub doctor_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the requesting patient's profile. Never re-synced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSnapshot {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub bmi: Option<f64>,
}

impl PatientSnapshot {
    /// Copy the snapshot fields out of a raw patient document.
    ///
    /// Reads the raw body rather than `Patient` so that partially migrated
    /// records still yield whatever fields they do carry.
    pub fn from_patient_document(doc: &Document) -> Self {
        let body = Value::Object(doc.clone());
        let text = |pointer: &str| {
            body.pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |pointer: &str| body.pointer(pointer).and_then(Value::as_f64);

        Self {
            name: text("/name"),
            email: text("/email"),
            phone: text("/contactInfo/phone"),
            age: body
                .pointer("/personalData/age")
                .and_then(Value::as_f64)
                .filter(|age| age.is_finite() && *age >= 0.0 && *age <= f64::from(u32::MAX))
                .map(|age| age.round() as u32),
            gender: text("/personalData/gender"),
            blood_type: text("/personalData/bloodType"),
            weight: number("/personalData/weightKg"),
            height: number("/personalData/heightCm"),
            bmi: number("/personalData/bmi"),
        }
    }
}
