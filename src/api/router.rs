//! HTTP API router.
//!
//! Returns a composable `Router`; every route is nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! 1. CORS → 2. Cache-Control default → 3. Extension(ApiContext) → 4. Auth (protected routes only)

use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route(
            "/organizations/:org_id/doctors",
            get(endpoints::organizations::doctors),
        )
        .route("/appointments", post(endpoints::appointments::create))
        .route(
            "/appointments/doctor/me",
            get(endpoints::appointments::doctor_list),
        )
        .route(
            "/appointments/patient/me",
            get(endpoints::appointments::patient_list),
        )
        .route(
            "/appointments/:id/accept",
            patch(endpoints::appointments::accept),
        )
        .route(
            "/appointments/:id/reject",
            patch(endpoints::appointments::reject),
        )
        .route(
            "/appointments/:id/reschedule",
            patch(endpoints::appointments::reschedule),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/organizations", get(endpoints::organizations::list))
        .route(
            "/organizations/check-device",
            post(endpoints::organizations::check_device),
        )
        .route(
            "/auth/register/doctor",
            post(endpoints::auth::register_doctor),
        )
        .route(
            "/auth/register/patient",
            post(endpoints::auth::register_patient),
        )
        .route("/auth/token", post(endpoints::auth::token))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone())
        .layer(axum::Extension(ctx));

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
}
