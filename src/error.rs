//! Service error taxonomy shared by every business module.
//!
//! Validation, not-found and conflict errors keep their kind through every
//! layer. Store failures become `Internal` with a generic message; the
//! original error goes to the log, never to the caller.

use crate::db::DatabaseError;
use crate::identity::IdentityError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Unauthorized(_) => "AUTH_REQUIRED",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidPath(detail) => {
                ServiceError::Validation(format!("Invalid identifier: {detail}"))
            }
            other => {
                tracing::error!(error = %other, "Store operation failed");
                ServiceError::Internal("Storage operation failed".into())
            }
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailAlreadyExists(email) => {
                ServiceError::Conflict(format!("Email {email} is already registered"))
            }
            IdentityError::InvalidEmail(email) => {
                ServiceError::Validation(format!("Invalid email address: {email}"))
            }
            IdentityError::WeakPassword(min) => ServiceError::Validation(format!(
                "Password must be at least {min} characters"
            )),
            IdentityError::InvalidCredential => {
                ServiceError::Unauthorized("Invalid or expired credential".into())
            }
            IdentityError::UnknownIdentity(uid) => {
                ServiceError::NotFound(format!("Identity {uid} does not exist"))
            }
            other => {
                tracing::error!(error = %other, "Identity provider failed");
                ServiceError::Internal("Identity operation failed".into())
            }
        }
    }
}

/// Reject blank required input.
pub fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ServiceError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::Validation(format!("{field} is required"))),
    }
}
