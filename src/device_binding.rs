//! Device binding and organization membership.
//!
//! A device (ESP32) is provisioned unbound, then bound to exactly one
//! organization by the first doctor registration that names it. Later
//! registrations may reuse it only under the same organization name.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{decode, encode, Document, DocumentStore, Query, SetMode};
use crate::error::{require, ServiceError};
use crate::models::{organization_id_for, paths, Coordinates, DeviceBinding, Organization};

const REGISTERED_DEVICE_IDS: &str = "registeredDeviceIds";

/// Which branch of the check a device fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCheckOutcome {
    /// Bound to an organization with the requested name.
    Joinable,
    /// Bound to a different organization.
    BoundElsewhere,
    /// Unbound, but the requested organization name is already in use.
    NameTaken,
    /// Unbound and the name is free: create the organization, then bind.
    Available,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCheck {
    pub exists: bool,
    pub bound_org_name: Option<String>,
    pub can_join: bool,
    pub should_create_org: bool,
    pub message: String,
    pub outcome: DeviceCheckOutcome,
}

impl DeviceCheck {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.outcome,
            DeviceCheckOutcome::BoundElsewhere | DeviceCheckOutcome::NameTaken
        )
    }
}

/// Where a new organization is located. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

/// Device IDs registered on an organization document.
///
/// Older records keep them as one comma-joined string.
pub fn registered_devices(doc: &Document) -> Vec<String> {
    match doc.get(REGISTERED_DEVICE_IDS) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn organization_from_document(mut doc: Document) -> Result<Organization, ServiceError> {
    let devices = registered_devices(&doc);
    doc.insert(REGISTERED_DEVICE_IDS.into(), json!(devices));
    Ok(decode(doc)?)
}

#[derive(Clone)]
pub struct DeviceBindingService {
    store: Arc<dyn DocumentStore>,
}

impl DeviceBindingService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create an unbound binding for `device_id`.
    ///
    /// Returns `false` when the device already existed; an existing binding
    /// is left exactly as it was.
    pub fn provision_device(&self, device_id: &str) -> Result<bool, ServiceError> {
        let device_id = require(Some(device_id), "deviceId")?;
        let created = self.store.create(
            &paths::device(device_id)?,
            encode(&DeviceBinding::unbound(device_id))?,
        )?;
        if created {
            tracing::info!(device_id = %device_id, "Device provisioned");
        }
        Ok(created)
    }

    pub fn get_device(&self, device_id: &str) -> Result<Option<DeviceBinding>, ServiceError> {
        let Some(mut doc) = self.store.get(&paths::device(device_id)?)? else {
            return Ok(None);
        };
        doc.entry("deviceId").or_insert_with(|| json!(device_id));
        Ok(Some(decode(doc)?))
    }

    pub fn check_device(
        &self,
        device_id: Option<&str>,
        organization_name: Option<&str>,
    ) -> Result<DeviceCheck, ServiceError> {
        let device_id = require(device_id, "deviceId")?;
        let organization_name = require(organization_name, "organizationName")?;

        let device = self
            .get_device(device_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("Device {device_id} is not registered")))?;

        if let Some((_, bound_name)) = device.bound_to() {
            let bound_name = bound_name.to_string();
            if bound_name.to_lowercase() == organization_name.to_lowercase() {
                return Ok(DeviceCheck {
                    exists: true,
                    message: format!("Device belongs to {bound_name}. You can join."),
                    bound_org_name: Some(bound_name),
                    can_join: true,
                    should_create_org: false,
                    outcome: DeviceCheckOutcome::Joinable,
                });
            }
            return Ok(DeviceCheck {
                exists: true,
                message: format!(
                    "Device is already assigned to {bound_name}. A different organization name cannot be used."
                ),
                bound_org_name: Some(bound_name),
                can_join: false,
                should_create_org: false,
                outcome: DeviceCheckOutcome::BoundElsewhere,
            });
        }

        if self.organization_name_in_use(organization_name)? {
            return Ok(DeviceCheck {
                exists: true,
                bound_org_name: None,
                can_join: false,
                should_create_org: false,
                message: format!(
                    "An organization named \"{organization_name}\" already exists. Choose a different name."
                ),
                outcome: DeviceCheckOutcome::NameTaken,
            });
        }

        Ok(DeviceCheck {
            exists: true,
            bound_org_name: None,
            can_join: false,
            should_create_org: true,
            message: format!(
                "Device available. Organization \"{organization_name}\" will be created and the device assigned to it."
            ),
            outcome: DeviceCheckOutcome::Available,
        })
    }

    /// Exact display-name match, or a document already sitting at the ID the
    /// name normalizes to.
    fn organization_name_in_use(&self, name: &str) -> Result<bool, ServiceError> {
        let by_name = self.store.query(
            &paths::organizations()?,
            &Query::new().where_eq("displayName", name).limit(1),
        )?;
        if !by_name.is_empty() {
            return Ok(true);
        }
        let org_id = organization_id_for(name);
        if org_id.is_empty() {
            return Ok(false);
        }
        Ok(self.store.get(&paths::organization(&org_id)?)?.is_some())
    }

    /// Bind `device_id` to an organization. Unconditional: callers run
    /// `check_device` first.
    pub fn assign_device(
        &self,
        device_id: &str,
        organization_id: &str,
        organization_name: &str,
    ) -> Result<(), ServiceError> {
        let patch = json!({
            "deviceId": device_id,
            "organizationId": organization_id,
            "organizationName": organization_name,
            "assignedAt": Utc::now(),
            "active": true,
        });
        let result = paths::device(device_id).and_then(|path| {
            self.store
                .set(&path, patch.as_object().cloned().unwrap_or_default(), SetMode::Merge)
        });
        match result {
            Ok(()) => {
                tracing::info!(device_id = %device_id, organization_id = %organization_id, "Device assigned");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, device_id = %device_id, "Device assignment failed");
                Err(ServiceError::Internal("Device assignment failed".into()))
            }
        }
    }

    /// Join the organization called `name`, creating it when nobody has yet.
    ///
    /// Returns the organization ID. The device is appended to the
    /// organization's registered set at most once.
    pub fn join_or_create_organization(
        &self,
        device_id: &str,
        name: &str,
        location: &Location,
    ) -> Result<String, ServiceError> {
        let name = require(Some(name), "organizationName")?;

        let existing = self.store.query(
            &paths::organizations()?,
            &Query::new().where_eq("displayName", name).limit(1),
        )?;
        if let Some(org) = existing.first() {
            let org_id = org.id().to_string();
            self.register_device(&org_id, device_id)?;
            return Ok(org_id);
        }

        let org_id = organization_id_for(name);
        if org_id.is_empty() {
            return Err(ServiceError::Validation("organizationName is required".into()));
        }
        let organization = Organization {
            id: org_id.clone(),
            display_name: name.to_string(),
            registered_device_ids: vec![device_id.to_string()],
            address: location.address.clone().unwrap_or_default(),
            coordinates: Coordinates {
                lat: location.lat,
                lng: location.lng,
            },
            created_at: Utc::now(),
        };
        if self
            .store
            .create(&paths::organization(&org_id)?, encode(&organization)?)?
        {
            tracing::info!(organization_id = %org_id, device_id = %device_id, "Organization created");
            return Ok(org_id);
        }

        // Lost a race, or another name normalized to the same ID.
        self.register_device(&org_id, device_id)?;
        Ok(org_id)
    }

    fn register_device(&self, org_id: &str, device_id: &str) -> Result<(), ServiceError> {
        let mut added = false;
        let stored = self.store.modify(&paths::organization(org_id)?, &mut |current| {
            let mut doc = current?;
            let mut devices = registered_devices(&doc);
            if devices.iter().any(|id| id == device_id) {
                return None;
            }
            devices.push(device_id.to_string());
            doc.insert(REGISTERED_DEVICE_IDS.into(), json!(devices));
            added = true;
            Some(doc)
        })?;
        if stored.is_none() {
            return Err(ServiceError::NotFound(format!("Organization {org_id} does not exist")));
        }
        if added {
            tracing::info!(organization_id = %org_id, device_id = %device_id, "Device added to organization");
        } else {
            tracing::debug!(organization_id = %org_id, device_id = %device_id, "Device already registered");
        }
        Ok(())
    }

    pub fn get_organization(&self, org_id: &str) -> Result<Organization, ServiceError> {
        let doc = self
            .store
            .get(&paths::organization(org_id)?)?
            .ok_or_else(|| ServiceError::NotFound(format!("Organization {org_id} does not exist")))?;
        organization_from_document(doc)
    }

    /// Every organization, ordered by display name.
    pub fn list_organizations(&self) -> Result<Vec<Organization>, ServiceError> {
        let mut organizations = Vec::new();
        for stored in self.store.list_collection(&paths::organizations()?)? {
            let id = stored.id().to_string();
            match organization_from_document(stored.data) {
                Ok(org) => organizations.push(org),
                Err(e) => tracing::warn!(organization_id = %id, error = %e, "Skipping unreadable organization"),
            }
        }
        organizations.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        Ok(organizations)
    }
}
