//! Doctor and patient registration, login.
//!
//! Registration is one logical unit spanning the identity provider and the
//! store. Once the identity exists, any failure deletes it again before the
//! error is returned.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{encode, DocumentStore, SetMode};
use crate::device_binding::{DeviceBindingService, Location};
use crate::error::{require, ServiceError};
use crate::identity::{Claims, IdentityProvider, IdentityRecord};
use crate::models::{paths, DoctorProfile, Patient, Role};
use crate::role_resolver::{RoleAssignment, RoleResolver};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRegistration {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRegistration {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub organization_id: Option<String>,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    devices: DeviceBindingService,
    resolver: RoleResolver,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        devices: DeviceBindingService,
        resolver: RoleResolver,
    ) -> Self {
        Self {
            store,
            identity,
            devices,
            resolver,
        }
    }

    pub fn register_doctor(&self, request: DoctorRegistration) -> Result<RegisteredUser, ServiceError> {
        let email = require(request.email.as_deref(), "email")?;
        let password = request.password.as_deref().unwrap_or_default();
        let doctor_name = require(request.doctor_name.as_deref(), "doctorName")?;
        let username = require(request.username.as_deref(), "username")?;
        let device_id = require(request.device_id.as_deref(), "deviceId")?;
        let organization_name = require(request.organization_name.as_deref(), "organizationName")?;

        // The device gates registration: nothing is written unless it may be used.
        let check = self
            .devices
            .check_device(Some(device_id), Some(organization_name))?;
        if check.is_conflict() {
            return Err(ServiceError::Conflict(check.message));
        }
        // A joinable device keeps the organization's stored spelling.
        let organization_name = check.bound_org_name.as_deref().unwrap_or(organization_name);

        let identity = self.identity.create_identity(email, password)?;
        let location = request.location.unwrap_or_default();
        let result = self.complete_doctor(
            &identity,
            doctor_name,
            username,
            device_id,
            organization_name,
            &location,
        );
        self.settle(&identity, result)
    }

    fn complete_doctor(
        &self,
        identity: &IdentityRecord,
        doctor_name: &str,
        username: &str,
        device_id: &str,
        organization_name: &str,
        location: &Location,
    ) -> Result<RegisteredUser, ServiceError> {
        let organization_id =
            self.devices
                .join_or_create_organization(device_id, organization_name, location)?;

        if let Err(e) = self
            .devices
            .assign_device(device_id, &organization_id, organization_name)
        {
            tracing::warn!(device_id = %device_id, error = %e, "Continuing registration without device binding");
        }

        let profile = DoctorProfile {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            username: username.to_string(),
            display_name: doctor_name.to_string(),
            device_id: device_id.to_string(),
            role: Role::Doctor,
            created_at: Utc::now(),
        };
        self.store.set(
            &paths::doctor(&organization_id, &identity.uid)?,
            encode(&profile)?,
            SetMode::Overwrite,
        )?;

        self.resolver
            .repair(&identity.uid, &RoleAssignment::doctor(organization_id.clone()));
        self.identity.set_claims(
            &identity.uid,
            Claims {
                role: Some(Role::Doctor),
                organization_id: Some(organization_id.clone()),
            },
        )?;

        tracing::info!(uid = %identity.uid, organization_id = %organization_id, "Doctor registered");
        Ok(RegisteredUser {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            role: Role::Doctor,
            organization_id: Some(organization_id),
        })
    }

    pub fn register_patient(&self, request: PatientRegistration) -> Result<RegisteredUser, ServiceError> {
        let email = require(request.email.as_deref(), "email")?;
        let password = request.password.as_deref().unwrap_or_default();
        let name = require(request.name.as_deref(), "name")?;

        let identity = self.identity.create_identity(email, password)?;
        let result = self.complete_patient(&identity, name);
        self.settle(&identity, result)
    }

    fn complete_patient(&self, identity: &IdentityRecord, name: &str) -> Result<RegisteredUser, ServiceError> {
        self.resolver.repair(&identity.uid, &RoleAssignment::patient());

        let patient = Patient::new_registration(&identity.uid, &identity.email, name);
        self.store.set(
            &paths::patient(&identity.uid)?,
            encode(&patient)?,
            SetMode::Overwrite,
        )?;

        self.identity.set_claims(
            &identity.uid,
            Claims {
                role: Some(Role::Patient),
                organization_id: None,
            },
        )?;

        tracing::info!(uid = %identity.uid, "Patient registered");
        Ok(RegisteredUser {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            role: Role::Patient,
            organization_id: None,
        })
    }

    /// On failure, delete the identity and surface a generic error.
    fn settle(
        &self,
        identity: &IdentityRecord,
        result: Result<RegisteredUser, ServiceError>,
    ) -> Result<RegisteredUser, ServiceError> {
        match result {
            Ok(user) => Ok(user),
            Err(e) => {
                tracing::error!(uid = %identity.uid, error = %e, "Registration failed, removing identity");
                if let Err(cleanup) = self.identity.delete_identity(&identity.uid) {
                    tracing::error!(uid = %identity.uid, error = %cleanup, "Failed to remove identity after registration failure");
                }
                Err(ServiceError::Internal("Registration failed".into()))
            }
        }
    }

    /// Exchange email and password for a bearer token.
    pub fn sign_in(&self, email: Option<&str>, password: Option<&str>) -> Result<String, ServiceError> {
        let email = require(email, "email")?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::Validation("password is required".into()))?;
        Ok(self.identity.sign_in(email, password)?)
    }

    /// Verify a credential, resolve the caller's role and refresh its cached claims.
    pub fn login(&self, token: Option<&str>) -> Result<RegisteredUser, ServiceError> {
        let token = require(token, "idToken")?;
        let verified = self.identity.verify_credential(token)?;
        let assignment = self.resolver.resolve(&verified.uid)?.ok_or_else(|| {
            ServiceError::NotFound(format!("User {} has no role assigned", verified.uid))
        })?;

        self.identity.set_claims(
            &verified.uid,
            Claims {
                role: Some(assignment.role),
                organization_id: assignment.organization_id.clone(),
            },
        )?;

        tracing::info!(uid = %verified.uid, role = %assignment.role, "User logged in");
        Ok(RegisteredUser {
            uid: verified.uid,
            email: verified.email,
            role: assignment.role,
            organization_id: assignment.organization_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{decode, MemoryStore};
    use crate::db::DatabaseError;
    use crate::identity::{IdentityError, LocalIdentityProvider, VerifiedIdentity};
    use crate::models::{DeviceBinding, UserRoleRecord};

    /// Delegates everything but refuses to store claims.
    struct ClaimsUnavailable(LocalIdentityProvider);

    impl IdentityProvider for ClaimsUnavailable {
        fn create_identity(&self, email: &str, password: &str) -> Result<IdentityRecord, IdentityError> {
            self.0.create_identity(email, password)
        }
        fn delete_identity(&self, uid: &str) -> Result<(), IdentityError> {
            self.0.delete_identity(uid)
        }
        fn set_claims(&self, _uid: &str, _claims: Claims) -> Result<(), IdentityError> {
            Err(IdentityError::Store(DatabaseError::LockPoisoned))
        }
        fn verify_credential(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
            self.0.verify_credential(token)
        }
        fn sign_in(&self, email: &str, password: &str) -> Result<String, IdentityError> {
            self.0.sign_in(email, password)
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        identity: Arc<LocalIdentityProvider>,
        service: RegistrationService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(LocalIdentityProvider::with_iterations(store.clone(), 1_000));
        let service = build(store.clone(), identity.clone());
        service.devices.provision_device("ESP32-01").unwrap();
        Fixture {
            store,
            identity,
            service,
        }
    }

    fn build(store: Arc<MemoryStore>, identity: Arc<dyn IdentityProvider>) -> RegistrationService {
        RegistrationService::new(
            store.clone(),
            identity,
            DeviceBindingService::new(store.clone()),
            RoleResolver::new(store),
        )
    }

    fn doctor(email: &str, device: &str, org: &str) -> DoctorRegistration {
        DoctorRegistration {
            email: Some(email.into()),
            password: Some("secret123".into()),
            doctor_name: Some("Dr. Ruiz".into()),
            username: Some("druiz".into()),
            device_id: Some(device.into()),
            organization_name: Some(org.into()),
            location: Some(Location {
                address: Some("Av. Sur 12".into()),
                lat: Some(19.4),
                lng: Some(-99.1),
            }),
        }
    }

    #[test]
    fn doctor_registration_writes_everything() {
        let f = fixture();
        let user = f
            .service
            .register_doctor(doctor("ruiz@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap();
        assert_eq!(user.role, Role::Doctor);
        assert_eq!(user.organization_id.as_deref(), Some("clinica_sur"));

        let org = f.service.devices.get_organization("clinica_sur").unwrap();
        assert_eq!(org.registered_device_ids, vec!["ESP32-01"]);
        assert_eq!(org.address, "Av. Sur 12");

        let device: DeviceBinding = decode(
            f.store.get(&paths::device("ESP32-01").unwrap()).unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(device.bound_to(), Some(("clinica_sur", "Clinica Sur")));

        let profile: DoctorProfile = decode(
            f.store
                .get(&paths::doctor("clinica_sur", &user.uid).unwrap())
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(profile.display_name, "Dr. Ruiz");

        let record: UserRoleRecord = decode(
            f.store.get(&paths::user_role(&user.uid).unwrap()).unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(record.role, Role::Doctor);

        let claims = f.identity.claims(&user.uid).unwrap();
        assert_eq!(claims.organization_id.as_deref(), Some("clinica_sur"));
    }

    #[test]
    fn unknown_device_blocks_registration() {
        let f = fixture();
        let err = f
            .service
            .register_doctor(doctor("ruiz@example.com", "ESP32-99", "Clinica Sur"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(f.identity.account_count(), 0);
        assert!(f.service.devices.list_organizations().unwrap().is_empty());
    }

    #[test]
    fn device_bound_elsewhere_is_a_conflict() {
        let f = fixture();
        f.service
            .register_doctor(doctor("ruiz@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap();
        let err = f
            .service
            .register_doctor(doctor("vega@example.com", "ESP32-01", "Clinica Norte"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(f.identity.account_count(), 1);
        assert_eq!(f.service.devices.list_organizations().unwrap().len(), 1);
    }

    #[test]
    fn second_doctor_joins_through_the_bound_device() {
        let f = fixture();
        f.service
            .register_doctor(doctor("ruiz@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap();
        let second = f
            .service
            .register_doctor(doctor("vega@example.com", "ESP32-01", "clinica sur"))
            .unwrap();
        assert_eq!(second.organization_id.as_deref(), Some("clinica_sur"));
        let org = f.service.devices.get_organization("clinica_sur").unwrap();
        assert_eq!(org.registered_device_ids, vec!["ESP32-01"]);
        let device = f.service.devices.get_device("ESP32-01").unwrap().unwrap();
        assert_eq!(device.organization_name.as_deref(), Some("Clinica Sur"));
    }

    #[test]
    fn duplicate_email_surfaces_as_conflict() {
        let f = fixture();
        f.service
            .register_patient(PatientRegistration {
                email: Some("ana@example.com".into()),
                password: Some("secret123".into()),
                name: Some("Ana".into()),
            })
            .unwrap();
        let err = f
            .service
            .register_doctor(doctor("ana@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(f.service.devices.list_organizations().unwrap().is_empty());
    }

    #[test]
    fn failure_after_identity_creation_removes_identity() {
        let store = Arc::new(MemoryStore::new());
        let inner = LocalIdentityProvider::with_iterations(store.clone(), 1_000);
        let identity = Arc::new(ClaimsUnavailable(inner));
        let service = build(store.clone(), identity.clone());
        service.devices.provision_device("ESP32-01").unwrap();

        let err = service
            .register_doctor(doctor("ruiz@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap_err();
        assert_eq!(err, ServiceError::Internal("Registration failed".into()));
        assert_eq!(identity.0.account_count(), 0);

        let err = service
            .register_patient(PatientRegistration {
                email: Some("ana@example.com".into()),
                password: Some("secret123".into()),
                name: Some("Ana".into()),
            })
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(identity.0.account_count(), 0);
    }

    #[test]
    fn patient_registration_uses_placeholders() {
        let f = fixture();
        let user = f
            .service
            .register_patient(PatientRegistration {
                email: Some("ana@example.com".into()),
                password: Some("secret123".into()),
                name: Some("Ana".into()),
            })
            .unwrap();
        assert_eq!(user.role, Role::Patient);
        assert_eq!(user.organization_id, None);
        let patient: Patient = decode(
            f.store.get(&paths::patient(&user.uid).unwrap()).unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(patient.assigned_doctor_name, "Pendiente");
        assert_eq!(patient.pathology_label, "Pendiente");
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let f = fixture();
        let mut req = doctor("ruiz@example.com", "ESP32-01", "Clinica Sur");
        req.username = None;
        assert!(matches!(
            f.service.register_doctor(req),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            f.service.register_patient(PatientRegistration::default()),
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(f.identity.account_count(), 0);
    }

    #[test]
    fn login_resolves_role_and_refreshes_claims() {
        let f = fixture();
        let user = f
            .service
            .register_doctor(doctor("ruiz@example.com", "ESP32-01", "Clinica Sur"))
            .unwrap();
        f.identity.set_claims(&user.uid, Claims::default()).unwrap();
        f.store.delete(&paths::user_role(&user.uid).unwrap()).unwrap();

        let token = f
            .service
            .sign_in(Some("ruiz@example.com"), Some("secret123"))
            .unwrap();
        let logged_in = f.service.login(Some(&token)).unwrap();
        assert_eq!(logged_in, user);
        assert_eq!(
            f.identity.claims(&user.uid).unwrap().organization_id.as_deref(),
            Some("clinica_sur")
        );
    }

    #[test]
    fn login_without_role_is_not_found() {
        let f = fixture();
        f.identity
            .create_identity("orphan@example.com", "secret123")
            .unwrap();
        let token = f
            .service
            .sign_in(Some("orphan@example.com"), Some("secret123"))
            .unwrap();
        assert!(matches!(
            f.service.login(Some(&token)),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            f.service.login(Some("bogus")),
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
