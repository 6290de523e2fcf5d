//! Shared application state.
//!
//! `CoreState` owns the store and identity provider handles and the
//! services built on them. Wrapped in `Arc` at startup and shared by every
//! HTTP handler; services hold their dependencies, never a global.

use std::sync::Arc;
use std::time::Instant;

use crate::appointment::AppointmentService;
use crate::db::DocumentStore;
use crate::device_binding::DeviceBindingService;
use crate::directory::DirectoryService;
use crate::identity::IdentityProvider;
use crate::registration::RegistrationService;
use crate::role_resolver::RoleResolver;

pub struct CoreState {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    pub devices: DeviceBindingService,
    pub roles: RoleResolver,
    pub appointments: AppointmentService,
    pub registration: RegistrationService,
    pub directory: DirectoryService,
    started_at: Instant,
}

impl CoreState {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        let devices = DeviceBindingService::new(store.clone());
        let roles = RoleResolver::new(store.clone());
        let appointments = AppointmentService::new(store.clone(), roles.clone());
        let registration = RegistrationService::new(
            store.clone(),
            identity.clone(),
            devices.clone(),
            roles.clone(),
        );
        let directory = DirectoryService::new(store.clone());

        Self {
            store,
            identity,
            devices,
            roles,
            appointments,
            registration,
            directory,
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl std::fmt::Debug for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreState")
            .field("uptime_secs", &self.uptime_secs())
            .finish_non_exhaustive()
    }
}
