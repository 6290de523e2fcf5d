use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A clinic. `id` is derived from the display name at creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub registered_device_ids: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub coordinates: Coordinates,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Organization ID for a display name: trimmed, whitespace runs joined by `_`, lower-cased.
pub fn organization_id_for(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
