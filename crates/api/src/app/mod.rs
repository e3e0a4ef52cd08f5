//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/resolver wiring (in-memory or Postgres)
//! - `routes/`: HTTP routes + handlers (one file per grid layer)
//! - `dto.rs`: request/response DTOs and path/query parsing
//! - `errors.rs`: consistent `{ "error", "message" }` responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use sitegate_auth::{Hs256JwtValidator, JwtValidator};

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &ApiConfig) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    let jwt: Arc<dyn JwtValidator> =
        Arc::new(Hs256JwtValidator::new(config.jwt_secret.clone().into_bytes()));
    Ok(build_router(Arc::new(services), jwt))
}

/// Router over already-built services.
pub fn build_router(services: Arc<AppServices>, jwt: Arc<dyn JwtValidator>) -> Router {
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
