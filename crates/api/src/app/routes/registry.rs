//! Enum registry endpoint, so editors can render the grid without hard-coding it.

use axum::response::IntoResponse;
use axum::Json;

use sitegate_auth::{Action, Cell, ModuleCode, RoleKey};

/// GET /permissions/registry
pub async fn registry() -> impl IntoResponse {
    Json(serde_json::json!({
        "modules": ModuleCode::ALL,
        "actions": Action::ALL,
        "roles": RoleKey::ALL,
        "locked_cells": Cell::locked().collect::<Vec<_>>(),
    }))
}
