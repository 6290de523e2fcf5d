//! Shared types for the HTTP API layer.

use std::sync::Arc;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::identity::Claims;
use crate::models::Role;
use crate::role_resolver::RoleAssignment;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }

    /// The caller's role, from its claims or, when they carry none, from the resolver.
    pub fn assignment(&self, auth: &AuthContext) -> Result<RoleAssignment, ApiError> {
        if let Some(role) = auth.claims.role {
            return Ok(RoleAssignment {
                role,
                organization_id: auth.claims.organization_id.clone(),
            });
        }
        self.core
            .roles
            .resolve(&auth.uid)?
            .ok_or_else(|| ApiError::Forbidden("No role assigned".into()))
    }

    /// Reject callers whose role is not `role`.
    pub fn require_role(&self, auth: &AuthContext, role: Role) -> Result<RoleAssignment, ApiError> {
        let assignment = self.assignment(auth)?;
        if assignment.role != role {
            return Err(ApiError::Forbidden(format!("Only {role} accounts may do this")));
        }
        Ok(assignment)
    }
}

// ═══════════════════════════════════════════════════════════
// Auth context: injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// Authenticated caller, injected into request extensions
/// by the auth middleware after the bearer credential verifies.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub uid: String,
    pub email: String,
    pub claims: Claims,
}
