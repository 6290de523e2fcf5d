use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Role;

/// Stored at `users/{uid}`. A cache of role and organization; once a role is
/// written, reconciliation never replaces it with a different one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleRecord {
    pub uid: String,
    pub role: Role,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
