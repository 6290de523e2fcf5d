//! Role and organization resolution.
//!
//! `users/{uid}` is a cache. When it is missing, the role is inferred from
//! where the user's profile lives (a doctor profile under some organization,
//! or a patient document) and the cache is repaired on the way out.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{DatabaseError, DocumentStore};
use crate::error::ServiceError;
use crate::models::{paths, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub role: Role,
    pub organization_id: Option<String>,
}

impl RoleAssignment {
    pub fn doctor(organization_id: impl Into<String>) -> Self {
        Self {
            role: Role::Doctor,
            organization_id: Some(organization_id.into()),
        }
    }

    pub fn patient() -> Self {
        Self {
            role: Role::Patient,
            organization_id: None,
        }
    }
}

/// What `reconcile` did to the role record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRecordWrite {
    Created,
    Updated,
    /// The record already names a different role (carried here verbatim).
    SkippedConflict(String),
}

#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn DocumentStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Role and organization for `uid`. `None` when the user has no role anywhere.
    pub fn resolve(&self, uid: &str) -> Result<Option<RoleAssignment>, ServiceError> {
        let cached = self.cached(uid)?;
        match &cached {
            Some(assignment) if assignment.role == Role::Patient => return Ok(cached),
            Some(assignment) if assignment.organization_id.is_some() => return Ok(cached),
            _ => {}
        }

        if let Some(org_id) = self.store.find_doctor_organization(uid)? {
            tracing::debug!(uid = %uid, organization_id = %org_id, "Role resolved from doctor profile");
            let assignment = RoleAssignment::doctor(org_id);
            self.repair(uid, &assignment);
            return Ok(Some(assignment));
        }

        // A doctor record without an organization stays a doctor.
        if cached.is_some() {
            tracing::warn!(uid = %uid, "Doctor role record has no organization and no profile was found");
            return Ok(cached);
        }

        if self.store.get(&paths::patient(uid)?)?.is_some() {
            tracing::debug!(uid = %uid, "Role resolved from patient record");
            let assignment = RoleAssignment::patient();
            self.repair(uid, &assignment);
            return Ok(Some(assignment));
        }

        tracing::debug!(uid = %uid, "No role found");
        Ok(None)
    }

    /// Organization owning the doctor `doctor_id`.
    pub fn doctor_organization(&self, doctor_id: &str) -> Result<String, ServiceError> {
        match self.resolve(doctor_id)? {
            Some(RoleAssignment {
                role: Role::Doctor,
                organization_id: Some(org_id),
            }) => Ok(org_id),
            _ => Err(ServiceError::NotFound(format!(
                "No organization found for doctor {doctor_id}"
            ))),
        }
    }

    fn cached(&self, uid: &str) -> Result<Option<RoleAssignment>, ServiceError> {
        let Some(record) = self.store.get(&paths::user_role(uid)?)? else {
            return Ok(None);
        };
        let Some(role) = record
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::parse_stored)
        else {
            return Ok(None);
        };
        let organization_id = match role {
            Role::Doctor => record
                .get("organizationId")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            Role::Patient => None,
        };
        Ok(Some(RoleAssignment {
            role,
            organization_id,
        }))
    }

    /// Write the role record unless it already names a different role.
    ///
    /// `createdAt` is set only when the record is new.
    pub fn reconcile(
        &self,
        uid: &str,
        assignment: &RoleAssignment,
    ) -> Result<RoleRecordWrite, DatabaseError> {
        let mut outcome = RoleRecordWrite::Created;
        self.store.modify(&paths::user_role(uid)?, &mut |current| {
            let existed = current.is_some();
            let mut doc = current.unwrap_or_default();

            if let Some(existing) = doc.get("role").and_then(Value::as_str) {
                let same = Role::parse_stored(existing) == Some(assignment.role);
                if !existing.is_empty() && !same {
                    outcome = RoleRecordWrite::SkippedConflict(existing.to_string());
                    return None;
                }
            }

            doc.insert("uid".into(), json!(uid));
            doc.insert("role".into(), json!(assignment.role.as_str()));
            doc.insert("organizationId".into(), json!(assignment.organization_id));
            if existed {
                outcome = RoleRecordWrite::Updated;
            } else {
                doc.insert("createdAt".into(), json!(Utc::now()));
                outcome = RoleRecordWrite::Created;
            }
            Some(doc)
        })?;
        Ok(outcome)
    }

    /// `reconcile`, with failures logged and dropped.
    pub fn repair(&self, uid: &str, assignment: &RoleAssignment) {
        match self.reconcile(uid, assignment) {
            Ok(RoleRecordWrite::SkippedConflict(existing)) => {
                tracing::warn!(uid = %uid, existing = %existing, inferred = %assignment.role, "Role record kept; inferred role differs");
            }
            Ok(write) => tracing::debug!(uid = %uid, ?write, "Role record repaired"),
            Err(e) => tracing::error!(uid = %uid, error = %e, "Role record repair failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{decode, MemoryStore, SetMode};
    use crate::models::UserRoleRecord;

    fn resolver() -> (Arc<MemoryStore>, RoleResolver) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), RoleResolver::new(store))
    }

    fn put(store: &MemoryStore, path: &str, body: Value) {
        store
            .set(
                &crate::db::DocPath::parse(path).unwrap(),
                body.as_object().cloned().unwrap(),
                SetMode::Overwrite,
            )
            .unwrap();
    }

    fn role_record(store: &MemoryStore, uid: &str) -> Option<UserRoleRecord> {
        store
            .get(&paths::user_role(uid).unwrap())
            .unwrap()
            .map(|doc| decode(doc).unwrap())
    }

    #[test]
    fn cached_record_is_the_fast_path() {
        let (store, roles) = resolver();
        put(&store, "users/doc-1", json!({"role": "doctor", "organizationId": "clinica_sur"}));
        assert_eq!(
            roles.resolve("doc-1").unwrap(),
            Some(RoleAssignment::doctor("clinica_sur"))
        );
        put(&store, "users/pat-1", json!({"role": "paciente", "organizationId": "ignored"}));
        assert_eq!(roles.resolve("pat-1").unwrap(), Some(RoleAssignment::patient()));
    }

    #[test]
    fn doctor_found_by_scan_repairs_the_record() {
        let (store, roles) = resolver();
        put(&store, "organizations/clinica_sur", json!({"displayName": "Clinica Sur"}));
        put(&store, "organizations/clinica_sur/doctors/doc-1", json!({"uid": "doc-1"}));

        assert_eq!(
            roles.resolve("doc-1").unwrap(),
            Some(RoleAssignment::doctor("clinica_sur"))
        );
        let record = role_record(&store, "doc-1").unwrap();
        assert_eq!(record.role, Role::Doctor);
        assert_eq!(record.organization_id.as_deref(), Some("clinica_sur"));
        assert!(record.created_at.is_some());
    }

    #[test]
    fn doctor_found_by_search_when_scan_unsupported() {
        let (store, roles) = resolver();
        store.disable_collection_group();
        put(&store, "organizations/clinica_norte", json!({"displayName": "Clinica Norte"}));
        put(&store, "organizations/clinica_sur", json!({"displayName": "Clinica Sur"}));
        put(&store, "organizations/clinica_sur/doctors/doc-1", json!({"uid": "doc-1"}));

        assert_eq!(
            roles.resolve("doc-1").unwrap(),
            Some(RoleAssignment::doctor("clinica_sur"))
        );
    }

    #[test]
    fn patient_found_by_record_lookup() {
        let (store, roles) = resolver();
        put(&store, "patients/pat-1", json!({"uid": "pat-1", "name": "Ana"}));
        assert_eq!(roles.resolve("pat-1").unwrap(), Some(RoleAssignment::patient()));
        assert_eq!(role_record(&store, "pat-1").unwrap().role, Role::Patient);
    }

    #[test]
    fn unknown_user_has_no_role() {
        let (store, roles) = resolver();
        assert_eq!(roles.resolve("ghost").unwrap(), None);
        assert!(role_record(&store, "ghost").is_none());
        assert!(matches!(
            roles.doctor_organization("ghost"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn doctor_record_without_org_is_completed_structurally() {
        let (store, roles) = resolver();
        put(&store, "users/doc-1", json!({"role": "doctor", "organizationId": null}));
        put(&store, "organizations/clinica_sur", json!({"displayName": "Clinica Sur"}));
        put(&store, "organizations/clinica_sur/doctors/doc-1", json!({"uid": "doc-1"}));

        assert_eq!(roles.doctor_organization("doc-1").unwrap(), "clinica_sur");
        assert_eq!(
            role_record(&store, "doc-1").unwrap().organization_id.as_deref(),
            Some("clinica_sur")
        );
    }

    #[test]
    fn doctor_record_without_org_or_profile_stays_doctor() {
        let (store, roles) = resolver();
        put(&store, "users/doc-1", json!({"role": "doctor"}));
        assert_eq!(
            roles.resolve("doc-1").unwrap(),
            Some(RoleAssignment {
                role: Role::Doctor,
                organization_id: None
            })
        );
    }

    #[test]
    fn reconcile_never_replaces_a_different_role() {
        let (store, roles) = resolver();
        put(&store, "users/u1", json!({"uid": "u1", "role": "doctor", "organizationId": "clinica_sur"}));

        let write = roles.reconcile("u1", &RoleAssignment::patient()).unwrap();
        assert_eq!(write, RoleRecordWrite::SkippedConflict("doctor".into()));
        let record = role_record(&store, "u1").unwrap();
        assert_eq!(record.role, Role::Doctor);
        assert_eq!(record.organization_id.as_deref(), Some("clinica_sur"));
    }

    #[test]
    fn reconcile_updates_matching_role_and_keeps_created_at() {
        let (store, roles) = resolver();
        assert_eq!(
            roles.reconcile("u1", &RoleAssignment::doctor("a")).unwrap(),
            RoleRecordWrite::Created
        );
        let created = role_record(&store, "u1").unwrap().created_at;
        assert_eq!(
            roles.reconcile("u1", &RoleAssignment::doctor("b")).unwrap(),
            RoleRecordWrite::Updated
        );
        let record = role_record(&store, "u1").unwrap();
        assert_eq!(record.organization_id.as_deref(), Some("b"));
        assert_eq!(record.created_at, created);
    }
}
