pub mod api;
pub mod appointment;
pub mod config;
pub mod core_state;
pub mod db;
pub mod device_binding;
pub mod directory;
pub mod error;
pub mod identity;
pub mod models;
pub mod registration;
pub mod role_resolver;

#[cfg(test)]
mod lifecycle_tests;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError, StoreLocation};
use crate::core_state::CoreState;
use crate::db::{DatabaseError, DocumentStore, MemoryStore, SqliteStore};
use crate::error::ServiceError;
use crate::identity::LocalIdentityProvider;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Cannot create data directory: {0}")]
    DataDir(std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Device provisioning failed: {0}")]
    Provisioning(#[from] ServiceError),
    #[error("Server error: {0}")]
    Server(#[from] api::ServerError),
}

fn open_store(location: &StoreLocation) -> Result<Arc<dyn DocumentStore>, StartupError> {
    match location {
        StoreLocation::Memory => {
            tracing::warn!("Using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(StartupError::DataDir)?;
            }
            tracing::info!(path = %path.display(), "Opening document store");
            Ok(Arc::new(SqliteStore::open(path)?))
        }
    }
}

/// Build the shared state from configuration and provision configured devices.
pub fn build_core(config: &Config) -> Result<Arc<CoreState>, StartupError> {
    let store = open_store(&config.store)?;
    let identity = Arc::new(
        LocalIdentityProvider::with_iterations(store.clone(), config.pbkdf2_iterations)
            .with_token_ttl(config.token_ttl),
    );
    let core = CoreState::new(store, identity);

    for device_id in &config.provision_devices {
        core.devices.provision_device(device_id)?;
    }
    Ok(Arc::new(core))
}

/// Initialise logging, start the API server and run until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = Config::from_env()?;
    let core = build_core(&config)?;
    let mut server = api::start_api_server(core, config.bind_addr).await?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.stopped().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn config(store: StoreLocation, devices: &[&str]) -> Config {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            store,
            provision_devices: devices.iter().map(|d| d.to_string()).collect(),
            pbkdf2_iterations: 1_000,
            token_ttl: chrono::Duration::hours(1),
        }
    }

    #[test]
    fn build_core_provisions_devices_in_memory() {
        let core = build_core(&config(StoreLocation::Memory, &["ESP32-01", "ESP32-02"])).unwrap();
        assert!(core.devices.get_device("ESP32-01").unwrap().is_some());
        assert!(core.devices.get_device("ESP32-02").unwrap().is_some());
        assert!(core.devices.get_device("ESP32-03").unwrap().is_none());
    }

    #[test]
    fn build_core_creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clinilink.db");
        let core = build_core(&config(StoreLocation::File(path.clone()), &["ESP32-01"])).unwrap();
        assert!(path.exists());
        assert!(core.devices.get_device("ESP32-01").unwrap().is_some());
        drop(core);

        // Provisioning again is a no-op on the persisted store.
        let core = build_core(&config(StoreLocation::File(path), &["ESP32-01"])).unwrap();
        assert!(core.devices.get_device("ESP32-01").unwrap().is_some());
    }

    #[test]
    fn registered_accounts_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let location = StoreLocation::File(dir.path().join("clinilink.db"));

        let (user, token) = {
            let core = build_core(&config(location.clone(), &[])).unwrap();
            let user = core
                .registration
                .register_patient(registration::PatientRegistration {
                    email: Some("ana@example.com".into()),
                    password: Some("secret123".into()),
                    name: Some("Ana".into()),
                })
                .unwrap();
            let token = core
                .registration
                .sign_in(Some("ana@example.com"), Some("secret123"))
                .unwrap();
            (user, token)
        };

        let core = build_core(&config(location, &[])).unwrap();
        assert_eq!(core.registration.login(Some(&token)).unwrap(), user);
        assert!(core
            .registration
            .sign_in(Some("ana@example.com"), Some("secret123"))
            .is_ok());
    }
}
