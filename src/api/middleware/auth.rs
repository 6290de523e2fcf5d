//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, verifies it with the identity
//! provider, and injects `AuthContext` into request extensions for
//! downstream handlers.

use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthContext};
use crate::identity::IdentityError;

/// Require a valid bearer credential.
///
/// Reads `ApiContext` from the request extensions. A verified caller reaches
/// the handler with `AuthContext` attached; anything else gets a 401.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("ApiContext extension not installed".into()))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let verified = match ctx.core.identity().verify_credential(&token) {
        Ok(verified) => verified,
        Err(IdentityError::InvalidCredential) => {
            tracing::debug!("Rejected bearer credential");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    req.extensions_mut().insert(AuthContext {
        uid: verified.uid,
        email: verified.email,
        claims: verified.claims,
    });

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
