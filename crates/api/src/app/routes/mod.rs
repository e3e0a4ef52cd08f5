use axum::{routing::get, Router};

pub mod check;
pub mod project_overrides;
pub mod registry;
pub mod system;
pub mod templates;
pub mod user_overrides;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/permissions", permissions_router())
}

fn permissions_router() -> Router {
    Router::new()
        .route("/registry", get(registry::registry))
        .route("/check", get(check::check))
        .nest("/templates", templates::router())
        .nest("/projects", project_router())
}

fn project_router() -> Router {
    Router::new()
        .merge(project_overrides::router())
        .merge(user_overrides::router())
}
