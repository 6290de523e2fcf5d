use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Role;

/// Stored at `organizations/{orgId}/doctors/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorProfile {
    pub uid: String,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub device_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}
