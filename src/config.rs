use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

use crate::identity::{DEFAULT_PBKDF2_ITERATIONS, DEFAULT_TOKEN_TTL_HOURS};

/// Application-level constants
pub const APP_NAME: &str = "Clinilink";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DATABASE_FILE: &str = "clinilink.db";
const MEMORY_DATABASE: &str = ":memory:";

/// Get the application data directory
/// ~/Clinilink/ on all platforms
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(APP_NAME)
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    "clinilink_lib=info,clinilink=info,tower_http=warn".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Where documents are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store: StoreLocation,
    /// Device IDs provisioned (unbound) at startup.
    pub provision_devices: Vec<String>,
    pub pbkdf2_iterations: u32,
    /// Lifetime of bearer tokens issued by sign-in.
    pub token_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("CLINILINK_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "CLINILINK_BIND",
            value: bind_raw.clone(),
        })?;

        let store = match get("CLINILINK_DB") {
            Some(v) if v == MEMORY_DATABASE => StoreLocation::Memory,
            Some(v) => StoreLocation::File(PathBuf::from(v)),
            None => StoreLocation::File(app_data_dir().join(DATABASE_FILE)),
        };

        let provision_devices = get("CLINILINK_DEVICES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let pbkdf2_iterations = match get("CLINILINK_PBKDF2_ITERATIONS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CLINILINK_PBKDF2_ITERATIONS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_PBKDF2_ITERATIONS,
        };

        let token_ttl_hours = match get("CLINILINK_TOKEN_TTL_HOURS") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n > 0 && n <= 24 * 365 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CLINILINK_TOKEN_TTL_HOURS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_TOKEN_TTL_HOURS,
        };

        Ok(Self {
            bind_addr,
            store,
            provision_devices,
            pbkdf2_iterations,
            token_ttl: Duration::hours(token_ttl_hours),
        })
    }
}
