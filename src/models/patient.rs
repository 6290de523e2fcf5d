use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Role;

/// Placeholder for assignment fields nobody has filled in yet.
pub const PENDING_LABEL: &str = "Pendiente";

/// Stored at `patients/{uid}`.
///
/// `assigned_doctor_name` is a display-name projection written when a doctor
/// accepts one of the patient's appointments. Last write wins; it is not kept
/// in sync with later changes to the doctor's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub assigned_doctor_name: String,
    pub last_visit_label: String,
    pub pathology_label: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_data: Option<PersonalData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalData {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
}

impl Patient {
    /// A freshly registered patient: nothing assigned yet.
    pub fn new_registration(uid: &str, email: &str, name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            assigned_doctor_name: PENDING_LABEL.to_string(),
            last_visit_label: PENDING_LABEL.to_string(),
            pathology_label: PENDING_LABEL.to_string(),
            role: Role::Patient,
            created_at: Utc::now(),
            contact_info: None,
            personal_data: None,
        }
    }
}
