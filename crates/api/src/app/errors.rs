use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use sitegate_auth::AuthzError;
use sitegate_core::DomainError;
use sitegate_infra::{ResolveError, StoreError};

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "permission store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn resolve_error_to_response(err: ResolveError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        ResolveError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ResolveError::MembershipNotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        ResolveError::AmbiguousMembership { .. } => {
            json_error(StatusCode::CONFLICT, "ambiguous_membership", message)
        }
        ResolveError::Store(e) => store_error_to_response(e),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let DomainError::Validation(msg) = err;
    json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

/// Unreadable request bodies are validation errors like any other bad input.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn query_rejection_to_response(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
