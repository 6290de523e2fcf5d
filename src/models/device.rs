use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored at `devices/{deviceId}`. Provisioned unbound; bound to one
/// organization by the first successful registration that names it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBinding {
    pub device_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: bool,
}

impl DeviceBinding {
    pub fn unbound(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            organization_id: None,
            organization_name: None,
            assigned_at: None,
            active: false,
        }
    }

    /// Bound organization `(id, name)`, if both halves are present and non-empty.
    pub fn bound_to(&self) -> Option<(&str, &str)> {
        match (self.organization_id.as_deref(), self.organization_name.as_deref()) {
            (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => Some((id, name)),
            _ => None,
        }
    }
}
