//! Project override endpoints: an optional allow grid per (project, role)
//! that fully replaces the role template while it exists.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    routing::get,
    Json, Router,
};

use sitegate_auth::RoleKey;
use sitegate_core::ProjectId;
use sitegate_infra::ProjectOverrideStore;

use crate::app::dto::{self, PutAllowMatrixRequest, SavedGrid};
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route(
        "/:project_id/overrides/:role",
        get(get_override).put(put_override).delete(reset_override),
    )
}

fn parse_scope(project_id: &str, role: &str) -> Result<(ProjectId, RoleKey), axum::response::Response> {
    Ok((dto::parse_project_id(project_id)?, dto::parse_role(role)?))
}

/// GET /permissions/projects/:project_id/overrides/:role
///
/// `{"override": null}` means the template applies; it is not an all-false grid.
pub async fn get_override(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, role)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, role) = match parse_scope(&project_id, &role) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };

    match services.project_overrides().get(project_id, role).await {
        Ok(record) => dto::ok_json(serde_json::json!({ "override": record })),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PUT /permissions/projects/:project_id/overrides/:role - full replacement (admin)
pub async fn put_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, role)): Path<(String, String)>,
    payload: Result<Json<PutAllowMatrixRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "save project override") {
        return errors::authz_error_to_response(e);
    }

    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let (project_id, role) = match parse_scope(&project_id, &role) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };
    let (matrix, expected) = match req.parse() {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match services
        .project_overrides()
        .put(project_id, role, matrix, expected)
        .await
    {
        Ok(record) => dto::ok_json(SavedGrid {
            record,
            coerced_cells: dto::coerced_cells(matrix),
        }),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /permissions/projects/:project_id/overrides/:role - reset to template (admin)
pub async fn reset_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, role)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "reset project override") {
        return errors::authz_error_to_response(e);
    }

    let (project_id, role) = match parse_scope(&project_id, &role) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };

    match services.resolver.reset_to_template(project_id, role).await {
        Ok(template) => dto::ok_json(serde_json::json!({ "override": null, "template": template })),
        Err(e) => errors::resolve_error_to_response(e),
    }
}
