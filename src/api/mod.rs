//! HTTP API.
//!
//! Routes are nested under `/api/`. Registration, sign-in, organization
//! listing and device checks are public; directory and appointment routes
//! require a bearer credential.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer, ApiSession, ServerError};
pub use types::ApiContext;
