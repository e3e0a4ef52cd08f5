//! User override endpoints: a sparse deny grid per (project, user), plus the
//! effective grid the user-override editor starts from.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    routing::get,
    Json, Router,
};

use sitegate_core::{ProjectId, UserId};
use sitegate_infra::UserOverrideStore;

use crate::app::dto::{self, EffectiveQuery, PutDenyMatrixRequest, SetCellRequest};
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route(
            "/:project_id/users/:user_id/overrides",
            get(get_user_override)
                .put(replace_user_override)
                .patch(set_user_override_cell)
                .delete(reset_user_override),
        )
        .route("/:project_id/users/:user_id/effective", get(get_effective_matrix))
}

fn parse_scope(project_id: &str, user_id: &str) -> Result<(ProjectId, UserId), axum::response::Response> {
    Ok((dto::parse_project_id(project_id)?, dto::parse_user_id(user_id)?))
}

/// GET /permissions/projects/:project_id/users/:user_id/overrides
pub async fn get_user_override(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, user_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, user_id) = match parse_scope(&project_id, &user_id) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };

    match services.user_overrides().get(project_id, user_id).await {
        Ok(record) => dto::ok_json(record),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PUT /permissions/projects/:project_id/users/:user_id/overrides - replace whole grid (admin)
pub async fn replace_user_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, user_id)): Path<(String, String)>,
    payload: Result<Json<PutDenyMatrixRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "replace user override") {
        return errors::authz_error_to_response(e);
    }

    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let (project_id, user_id) = match parse_scope(&project_id, &user_id) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };
    let (matrix, expected) = match req.parse() {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match services
        .user_overrides()
        .replace(project_id, user_id, matrix, expected)
        .await
    {
        Ok(record) => dto::ok_json(record),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PATCH /permissions/projects/:project_id/users/:user_id/overrides - one cell (admin)
pub async fn set_user_override_cell(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, user_id)): Path<(String, String)>,
    payload: Result<Json<SetCellRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "edit user override") {
        return errors::authz_error_to_response(e);
    }

    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let (project_id, user_id) = match parse_scope(&project_id, &user_id) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };
    let edit = match req.parse() {
        Ok(edit) => edit,
        Err(resp) => return resp,
    };

    match services
        .user_overrides()
        .set_cell(project_id, user_id, edit.module, edit.action, edit.value, edit.expected)
        .await
    {
        Ok(record) => dto::ok_json(record),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /permissions/projects/:project_id/users/:user_id/overrides (admin)
pub async fn reset_user_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, user_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "reset user override") {
        return errors::authz_error_to_response(e);
    }

    let (project_id, user_id) = match parse_scope(&project_id, &user_id) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };

    match services.user_overrides().reset(project_id, user_id).await {
        Ok(existed) => dto::ok_json(serde_json::json!({ "reset": true, "existed": existed })),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /permissions/projects/:project_id/users/:user_id/effective?role=
///
/// Without `role` the user's project membership decides it.
pub async fn get_effective_matrix(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, user_id)): Path<(String, String)>,
    query: Result<Query<EffectiveQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection_to_response(rejection),
    };
    let (project_id, user_id) = match parse_scope(&project_id, &user_id) {
        Ok(scope) => scope,
        Err(resp) => return resp,
    };

    let role = match query.role.as_deref() {
        Some(raw) => match dto::parse_role(raw) {
            Ok(r) => r,
            Err(resp) => return resp,
        },
        None => match services.resolver.role_for(project_id, user_id).await {
            Ok(r) => r,
            Err(e) => return errors::resolve_error_to_response(e),
        },
    };

    match services
        .resolver
        .resolve_effective_matrix(role, project_id, user_id)
        .await
    {
        Ok(matrix) => dto::ok_json(serde_json::json!({
            "project_id": project_id,
            "user_id": user_id,
            "role": role,
            "matrix": matrix,
        })),
        Err(e) => errors::resolve_error_to_response(e),
    }
}
