//! End-to-end behaviour through `CoreState`: device binding, registration,
//! role resolution and the appointment lifecycle working together.

use std::sync::Arc;

use serde_json::json;

use crate::appointment::{
    AcceptRequest, CreateAppointmentRequest, DoctorScope, RescheduleRequest,
};
use crate::core_state::CoreState;
use crate::db::{decode, encode, DocumentStore, MemoryStore, SetMode, SqliteStore};
use crate::device_binding::{DeviceCheckOutcome, Location};
use crate::error::ServiceError;
use crate::identity::LocalIdentityProvider;
use crate::models::{paths, AppointmentStatus, Patient, Role, UserRoleRecord};
use crate::registration::{DoctorRegistration, PatientRegistration, RegisteredUser};
use crate::role_resolver::{RoleAssignment, RoleRecordWrite};

struct Clinic {
    core: CoreState,
    store: Arc<MemoryStore>,
}

fn clinic() -> Clinic {
    let store = Arc::new(MemoryStore::new());
    let core = CoreState::new(
        store.clone(),
        Arc::new(LocalIdentityProvider::with_iterations(store.clone(), 1_000)),
    );
    for device in ["ESP32-01", "ESP32-02"] {
        core.devices.provision_device(device).unwrap();
    }
    Clinic { core, store }
}

fn doctor_request(email: &str, name: &str, device: &str, org: &str) -> DoctorRegistration {
    DoctorRegistration {
        email: Some(email.into()),
        password: Some("secret123".into()),
        doctor_name: Some(name.into()),
        username: Some(email.split('@').next().unwrap_or(email).into()),
        device_id: Some(device.into()),
        organization_name: Some(org.into()),
        location: None,
    }
}

fn register_patient(core: &CoreState, email: &str, name: &str) -> RegisteredUser {
    core.registration
        .register_patient(PatientRegistration {
            email: Some(email.into()),
            password: Some("secret123".into()),
            name: Some(name.into()),
        })
        .unwrap()
}

fn request(org: &str, doctor: &str, date: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        organization_id: Some(org.into()),
        doctor_id: Some(doctor.into()),
        requested_date: Some(date.into()),
        requested_time: Some("09:00".into()),
        reason: None,
    }
}

fn organization_count(store: &MemoryStore) -> usize {
    store
        .list_collection(&paths::organizations().unwrap())
        .unwrap()
        .len()
}

// ── Device idempotency ───────────────────────────────────

#[test]
fn repeated_assignment_registers_device_once() {
    let Clinic { core, store } = clinic();
    let first = core
        .devices
        .check_device(Some("ESP32-01"), Some("Clinica Sur"))
        .unwrap();
    assert!(first.should_create_org);

    for _ in 0..2 {
        let org_id = core
            .devices
            .join_or_create_organization("ESP32-01", "Clinica Sur", &Location::default())
            .unwrap();
        core.devices
            .assign_device("ESP32-01", &org_id, "Clinica Sur")
            .unwrap();
    }

    let second = core
        .devices
        .check_device(Some("ESP32-01"), Some("Clinica Sur"))
        .unwrap();
    assert!(second.can_join);
    assert_eq!(second.outcome, DeviceCheckOutcome::Joinable);

    let org = core.devices.get_organization("clinica_sur").unwrap();
    assert_eq!(org.registered_device_ids, vec!["ESP32-01"]);
    assert_eq!(organization_count(&store), 1);
}

// ── Name collision ───────────────────────────────────────

#[test]
fn existing_name_blocks_unbound_device_without_writes() {
    let Clinic { core, store } = clinic();
    core.registration
        .register_doctor(doctor_request("a@example.com", "Dra. Alba", "ESP32-01", "Clinica Sur"))
        .unwrap();
    let org_before = store.get(&paths::organization("clinica_sur").unwrap()).unwrap();
    let device_before = store.get(&paths::device("ESP32-02").unwrap()).unwrap();

    let check = core
        .devices
        .check_device(Some("ESP32-02"), Some("Clinica Sur"))
        .unwrap();
    assert!(!check.should_create_org);
    assert!(!check.can_join);
    assert!(check.is_conflict());
    assert!(check.message.contains("already exists"));

    assert_eq!(store.get(&paths::organization("clinica_sur").unwrap()).unwrap(), org_before);
    assert_eq!(store.get(&paths::device("ESP32-02").unwrap()).unwrap(), device_before);
}

// ── Role records ─────────────────────────────────────────

#[test]
fn role_record_is_write_once() {
    let Clinic { core, store } = clinic();
    let doctor = core
        .registration
        .register_doctor(doctor_request("a@example.com", "Dra. Alba", "ESP32-01", "Clinica Sur"))
        .unwrap();

    // A stray patient document for the same uid must not flip the role.
    store
        .set(
            &paths::patient(&doctor.uid).unwrap(),
            encode(&Patient::new_registration(&doctor.uid, "a@example.com", "Alba")).unwrap(),
            SetMode::Overwrite,
        )
        .unwrap();
    let write = core
        .roles
        .reconcile(&doctor.uid, &RoleAssignment::patient())
        .unwrap();
    assert_eq!(write, RoleRecordWrite::SkippedConflict("doctor".into()));

    let record: UserRoleRecord =
        decode(store.get(&paths::user_role(&doctor.uid).unwrap()).unwrap().unwrap()).unwrap();
    assert_eq!(record.role, Role::Doctor);
    assert_eq!(
        core.roles.resolve(&doctor.uid).unwrap(),
        Some(RoleAssignment::doctor("clinica_sur"))
    );
}

// ── Appointment decisions ────────────────────────────────

#[test]
fn pending_appointment_reaches_each_decision() {
    let Clinic { core, store } = clinic();
    let doctor = core
        .registration
        .register_doctor(doctor_request("a@example.com", "Dra. Alba", "ESP32-01", "Clinica Sur"))
        .unwrap();
    let patient = register_patient(&core, "p@example.com", "Ana");
    let scope = DoctorScope::new(doctor.uid.clone());

    let a = core.appointments.create(&patient.uid, request("clinica_sur", &doctor.uid, "2025-01-10")).unwrap();
    let b = core.appointments.create(&patient.uid, request("clinica_sur", &doctor.uid, "2025-01-11")).unwrap();
    let c = core.appointments.create(&patient.uid, request("clinica_sur", &doctor.uid, "2025-01-12")).unwrap();

    let accepted = core
        .appointments
        .accept(&scope, &a.id, AcceptRequest { doctor_notes: Some("ok".into()), doctor_name: None })
        .unwrap();
    assert_eq!(accepted.status, AppointmentStatus::Accepted);
    assert_eq!(accepted.doctor_response, "ok");
    assert_eq!(accepted.doctor_name.as_deref(), Some("Dra. Alba"));
    assert!(accepted.processed_at.is_some());

    let rejected = core.appointments.reject(&scope, &b.id, None).unwrap();
    assert_eq!(rejected.status, AppointmentStatus::Rejected);
    assert_eq!(rejected.doctor_response, "");
    assert!(rejected.processed_at.is_some());

    let path = paths::appointment("clinica_sur", &doctor.uid, &c.id).unwrap();
    let before = store.get(&path).unwrap();
    let missing_date = core.appointments.reschedule(
        &scope,
        &c.id,
        RescheduleRequest {
            alternative_date: None,
            alternative_time: Some("10:00".into()),
            doctor_notes: None,
        },
    );
    assert!(matches!(missing_date, Err(ServiceError::Validation(_))));
    assert_eq!(store.get(&path).unwrap(), before);

    let rescheduled = core
        .appointments
        .reschedule(
            &scope,
            &c.id,
            RescheduleRequest {
                alternative_date: Some("2025-01-20".into()),
                alternative_time: Some("10:00".into()),
                doctor_notes: Some("Otro dia".into()),
            },
        )
        .unwrap();
    assert_eq!(rescheduled.status, AppointmentStatus::Rescheduled);
    assert_eq!(rescheduled.alternative_date, "2025-01-20");
    assert_eq!(rescheduled.alternative_time, "10:00");
    assert_eq!(rescheduled.doctor_response, "Otro dia");
}

// ── Patient listing ──────────────────────────────────────

#[test]
fn patient_sees_appointments_across_doctors_and_organizations() {
    let Clinic { core, .. } = clinic();
    let sur = core
        .registration
        .register_doctor(doctor_request("a@example.com", "Dra. Alba", "ESP32-01", "Clinica Sur"))
        .unwrap();
    let norte = core
        .registration
        .register_doctor(doctor_request("b@example.com", "Dr. Bravo", "ESP32-02", "Clinica Norte"))
        .unwrap();
    let patient = register_patient(&core, "p@example.com", "Ana");
    let other = register_patient(&core, "q@example.com", "Luis");

    let first = core.appointments.create(&patient.uid, request("clinica_sur", &sur.uid, "2025-01-10")).unwrap();
    core.appointments.create(&patient.uid, request("clinica_norte", &norte.uid, "2025-01-11")).unwrap();
    core.appointments.create(&other.uid, request("clinica_sur", &sur.uid, "2025-01-12")).unwrap();

    core.appointments
        .reject(&DoctorScope::new(sur.uid.clone()), &first.id, None)
        .unwrap();

    let all = core.appointments.list_for_patient(&patient.uid, None).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|a| a.patient_id == patient.uid));
    let orgs: Vec<&str> = all.iter().map(|a| a.organization_id.as_str()).collect();
    assert!(orgs.contains(&"clinica_sur") && orgs.contains(&"clinica_norte"));

    let pending = core
        .appointments
        .list_for_patient(&patient.uid, Some(AppointmentStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].organization_id, "clinica_norte");

    let rejected = core
        .appointments
        .list_for_patient(&patient.uid, Some(AppointmentStatus::Rejected))
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, first.id);
}

// ── End to end ───────────────────────────────────────────

#[test]
fn doctor_registers_patient_books_doctor_accepts() {
    let Clinic { core, store } = clinic();
    let doctor = core
        .registration
        .register_doctor(doctor_request("ruiz@example.com", "Dr. Ruiz", "ESP32-01", "Clinica Sur"))
        .unwrap();
    assert_eq!(doctor.organization_id.as_deref(), Some("clinica_sur"));
    let org = core.devices.get_organization("clinica_sur").unwrap();
    assert_eq!(org.display_name, "Clinica Sur");
    assert_eq!(org.registered_device_ids, vec!["ESP32-01"]);

    let patient = register_patient(&core, "ana@example.com", "Ana");
    let appointment = core
        .appointments
        .create(
            &patient.uid,
            CreateAppointmentRequest {
                organization_id: None,
                doctor_id: Some(doctor.uid.clone()),
                requested_date: Some("2025-01-10".into()),
                requested_time: Some("09:00".into()),
                reason: None,
            },
        )
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.organization_id, "clinica_sur");

    let accepted = core
        .appointments
        .accept(
            &DoctorScope::new(doctor.uid.clone()),
            &appointment.id,
            AcceptRequest {
                doctor_notes: None,
                doctor_name: Some("Dr. Ruiz".into()),
            },
        )
        .unwrap();
    assert_eq!(accepted.status, AppointmentStatus::Accepted);
    assert_eq!(accepted.doctor_name.as_deref(), Some("Dr. Ruiz"));

    let stored: Patient =
        decode(store.get(&paths::patient(&patient.uid).unwrap()).unwrap().unwrap()).unwrap();
    assert_eq!(stored.assigned_doctor_name, "Dr. Ruiz");
}

#[test]
fn second_doctor_cannot_rebind_device_to_another_name() {
    let Clinic { core, store } = clinic();
    core.registration
        .register_doctor(doctor_request("ruiz@example.com", "Dr. Ruiz", "ESP32-01", "Clinica Sur"))
        .unwrap();

    let check = core
        .devices
        .check_device(Some("ESP32-01"), Some("Clinica Norte"))
        .unwrap();
    assert!(!check.can_join);
    assert_eq!(check.outcome, DeviceCheckOutcome::BoundElsewhere);
    assert!(check.message.contains("Clinica Sur"));

    let attempt = core.registration.register_doctor(doctor_request(
        "otro@example.com",
        "Dr. Otro",
        "ESP32-01",
        "Clinica Norte",
    ));
    assert!(matches!(attempt, Err(ServiceError::Conflict(_))));
    assert_eq!(organization_count(&store), 1);
    assert!(store.get(&paths::organization("clinica_norte").unwrap()).unwrap().is_none());
}

#[test]
fn second_doctor_joins_with_same_name() {
    let Clinic { core, store } = clinic();
    core.registration
        .register_doctor(doctor_request("ruiz@example.com", "Dr. Ruiz", "ESP32-01", "Clinica Sur"))
        .unwrap();
    let second = core
        .registration
        .register_doctor(doctor_request("vega@example.com", "Dra. Vega", "ESP32-01", "clinica sur"))
        .unwrap();
    assert_eq!(second.organization_id.as_deref(), Some("clinica_sur"));
    assert_eq!(organization_count(&store), 1);
    assert_eq!(core.directory.list_doctors("clinica_sur").unwrap().len(), 2);
}

// ── Resolver fallbacks ───────────────────────────────────

#[test]
fn organization_found_by_search_when_scan_unsupported_and_record_missing() {
    let Clinic { core, store } = clinic();
    let doctor = core
        .registration
        .register_doctor(doctor_request("ruiz@example.com", "Dr. Ruiz", "ESP32-01", "Clinica Sur"))
        .unwrap();

    store.delete(&paths::user_role(&doctor.uid).unwrap()).unwrap();
    store.disable_collection_group();

    assert_eq!(
        core.roles.resolve(&doctor.uid).unwrap(),
        Some(RoleAssignment::doctor("clinica_sur"))
    );
    let repaired = store.get(&paths::user_role(&doctor.uid).unwrap()).unwrap().unwrap();
    assert_eq!(repaired["role"], json!("doctor"));
    assert_eq!(repaired["organizationId"], json!("clinica_sur"));
}

#[test]
fn lifecycle_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("clinilink.db")).unwrap());
    let identity = Arc::new(LocalIdentityProvider::with_iterations(store.clone(), 1_000));
    let core = CoreState::new(store, identity);
    core.devices.provision_device("ESP32-01").unwrap();

    let doctor = core
        .registration
        .register_doctor(doctor_request("ruiz@example.com", "Dr. Ruiz", "ESP32-01", "Clinica Sur"))
        .unwrap();
    let patient = register_patient(&core, "ana@example.com", "Ana");
    let appointment = core
        .appointments
        .create(&patient.uid, request("clinica_sur", &doctor.uid, "2025-01-10"))
        .unwrap();
    core.appointments
        .accept(
            &DoctorScope::new(doctor.uid.clone()),
            &appointment.id,
            AcceptRequest::default(),
        )
        .unwrap();

    let listed = core.appointments.list_for_patient(&patient.uid, None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, AppointmentStatus::Accepted);
    assert_eq!(core.directory.get_patient(&patient.uid).unwrap().assigned_doctor_name, "Dr. Ruiz");
}
