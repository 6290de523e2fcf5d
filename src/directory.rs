//! Read-only lookups of doctor profiles and patient records.

use std::sync::Arc;

use crate::db::{decode, DocumentStore};
use crate::error::ServiceError;
use crate::models::{paths, DoctorProfile, Patient};

#[derive(Clone)]
pub struct DirectoryService {
    store: Arc<dyn DocumentStore>,
}

impl DirectoryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Doctors of one organization, ordered by display name.
    pub fn list_doctors(&self, organization_id: &str) -> Result<Vec<DoctorProfile>, ServiceError> {
        if self.store.get(&paths::organization(organization_id)?)?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Organization {organization_id} does not exist"
            )));
        }
        let mut doctors = Vec::new();
        for stored in self.store.list_collection(&paths::doctors(organization_id)?)? {
            let uid = stored.id().to_string();
            match decode::<DoctorProfile>(stored.data) {
                Ok(profile) => doctors.push(profile),
                Err(e) => tracing::warn!(uid = %uid, error = %e, "Skipping unreadable doctor profile"),
            }
        }
        doctors.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(doctors)
    }

    pub fn get_doctor(&self, organization_id: &str, uid: &str) -> Result<DoctorProfile, ServiceError> {
        let doc = self
            .store
            .get(&paths::doctor(organization_id, uid)?)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Doctor {uid} not found in organization {organization_id}"
                ))
            })?;
        Ok(decode(doc)?)
    }

    pub fn get_patient(&self, uid: &str) -> Result<Patient, ServiceError> {
        let doc = self
            .store
            .get(&paths::patient(uid)?)?
            .ok_or_else(|| ServiceError::NotFound(format!("Patient {uid} does not exist")))?;
        Ok(decode(doc)?)
    }
}
