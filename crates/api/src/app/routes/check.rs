//! Authorization check endpoint with decision explanation.

use std::sync::Arc;

use axum::extract::{rejection::QueryRejection, Extension, Query};

use crate::app::dto::{self, CheckQuery, DecisionResponse};
use crate::app::{errors, services::AppServices};

/// GET /permissions/check?module=&action=&project_id=&user_id=&role=
///
/// With `role` the given role is used as-is; without it the role comes from
/// the user's project membership.
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection_to_response(rejection),
    };
    let parsed = (|| {
        Ok::<_, axum::response::Response>((
            dto::parse_module(&query.module)?,
            dto::parse_action(&query.action)?,
            dto::parse_project_id(&query.project_id)?,
            dto::parse_user_id(&query.user_id)?,
            query.role.as_deref().map(dto::parse_role).transpose()?,
        ))
    })();
    let (module, action, project_id, user_id, role) = match parsed {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let decision = match role {
        Some(role) => {
            services
                .resolver
                .explain(module, action, role, project_id, user_id)
                .await
        }
        None => services.resolver.check(module, action, project_id, user_id).await,
    };

    match decision {
        Ok(d) => dto::ok_json(DecisionResponse::new(d, project_id, user_id)),
        Err(e) => errors::resolve_error_to_response(e),
    }
}
