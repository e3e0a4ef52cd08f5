//! Role template endpoints: one dense allow grid per role.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    routing::get,
    Json, Router,
};

use sitegate_infra::RoleTemplateStore;

use crate::app::dto::{self, PutAllowMatrixRequest, SavedGrid};
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_templates))
        .route("/:role", get(get_template).put(put_template))
}

/// GET /permissions/templates - every role, defaulted where never saved
pub async fn list_templates(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.templates().list().await {
        Ok(templates) => dto::ok_json(serde_json::json!({ "templates": templates })),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /permissions/templates/:role
pub async fn get_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(role): Path<String>,
) -> axum::response::Response {
    let role = match dto::parse_role(&role) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.templates().get(role).await {
        Ok(template) => dto::ok_json(template),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PUT /permissions/templates/:role - full replacement (admin)
pub async fn put_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(role): Path<String>,
    payload: Result<Json<PutAllowMatrixRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(e) = authz::authorize_mutation(&principal, "save role template") {
        return errors::authz_error_to_response(e);
    }

    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let role = match dto::parse_role(&role) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let (matrix, expected) = match req.parse() {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match services.templates().put(role, matrix, expected).await {
        Ok(template) => dto::ok_json(SavedGrid {
            record: template,
            coerced_cells: dto::coerced_cells(matrix),
        }),
        Err(e) => errors::store_error_to_response(e),
    }
}
