//! Stored entities and the paths they live at.

pub mod appointment;
pub mod device;
pub mod doctor;
pub mod enums;
pub mod organization;
pub mod patient;
pub mod user_role;

pub use appointment::*;
pub use device::*;
pub use doctor::*;
pub use enums::*;
pub use organization::*;
pub use patient::*;
pub use user_role::*;

/// Collection names.
pub mod collections {
    pub const ORGANIZATIONS: &str = "organizations";
    pub const DOCTORS: &str = "doctors";
    pub const APPOINTMENTS: &str = "appointments";
    pub const PATIENTS: &str = "patients";
    pub const USERS: &str = "users";
    pub const DEVICES: &str = "devices";
    pub const IDENTITIES: &str = "identities";
    pub const IDENTITY_EMAILS: &str = "identity_emails";
    pub const SESSIONS: &str = "sessions";
}

/// Path builders. IDs come from requests, so every builder validates.
pub mod paths {
    use super::collections::*;
    use crate::db::{CollectionPath, DatabaseError, DocPath};

    pub fn organizations() -> Result<CollectionPath, DatabaseError> {
        CollectionPath::root(ORGANIZATIONS)
    }

    pub fn organization(org_id: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(ORGANIZATIONS, org_id)
    }

    pub fn doctors(org_id: &str) -> Result<CollectionPath, DatabaseError> {
        organization(org_id)?.sub_collection(DOCTORS)
    }

    pub fn doctor(org_id: &str, uid: &str) -> Result<DocPath, DatabaseError> {
        doctors(org_id)?.doc(uid)
    }

    pub fn doctor_appointments(org_id: &str, doctor_id: &str) -> Result<CollectionPath, DatabaseError> {
        doctor(org_id, doctor_id)?.sub_collection(APPOINTMENTS)
    }

    pub fn appointment(org_id: &str, doctor_id: &str, id: &str) -> Result<DocPath, DatabaseError> {
        doctor_appointments(org_id, doctor_id)?.doc(id)
    }

    pub fn patient(uid: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(PATIENTS, uid)
    }

    pub fn user_role(uid: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(USERS, uid)
    }

    pub fn device(device_id: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(DEVICES, device_id)
    }

    pub fn identities() -> Result<CollectionPath, DatabaseError> {
        CollectionPath::root(IDENTITIES)
    }

    pub fn identity(uid: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(IDENTITIES, uid)
    }

    pub fn identity_emails() -> Result<CollectionPath, DatabaseError> {
        CollectionPath::root(IDENTITY_EMAILS)
    }

    /// Keyed by a digest of the normalized email, so any address is a valid segment.
    pub fn identity_email(email_key: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(IDENTITY_EMAILS, email_key)
    }

    pub fn sessions() -> Result<CollectionPath, DatabaseError> {
        CollectionPath::root(SESSIONS)
    }

    pub fn session(token_key: &str) -> Result<DocPath, DatabaseError> {
        DocPath::root(SESSIONS, token_key)
    }
}
