use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use sitegate_auth::{
    Action, AllowMatrix, Cell, CellOverride, Decision, DenyMatrix, ModuleCode, RoleKey,
    WireAllowMatrix, WireDenyMatrix,
};
use sitegate_core::{ExpectedVersion, ProjectId, UserId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body for saving a role template or a project override.
#[derive(Debug, Deserialize)]
pub struct PutAllowMatrixRequest {
    pub matrix: WireAllowMatrix,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl PutAllowMatrixRequest {
    pub fn parse(&self) -> Result<(AllowMatrix, ExpectedVersion), axum::response::Response> {
        let matrix = AllowMatrix::from_wire(&self.matrix).map_err(errors::domain_error_to_response)?;
        Ok((matrix, ExpectedVersion::from_option(self.expected_version)))
    }
}

/// Body for replacing a user's whole deny grid.
#[derive(Debug, Deserialize)]
pub struct PutDenyMatrixRequest {
    pub matrix: WireDenyMatrix,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl PutDenyMatrixRequest {
    pub fn parse(&self) -> Result<(DenyMatrix, ExpectedVersion), axum::response::Response> {
        let matrix = DenyMatrix::from_wire(&self.matrix).map_err(errors::domain_error_to_response)?;
        Ok((matrix, ExpectedVersion::from_option(self.expected_version)))
    }
}

/// Body for a single user-override cell edit.
#[derive(Debug, Deserialize)]
pub struct SetCellRequest {
    pub module: String,
    pub action: String,
    /// `"inherit"` or `"deny"`.
    pub value: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

pub struct ParsedCellEdit {
    pub module: ModuleCode,
    pub action: Action,
    pub value: CellOverride,
    pub expected: ExpectedVersion,
}

impl SetCellRequest {
    pub fn parse(&self) -> Result<ParsedCellEdit, axum::response::Response> {
        Ok(ParsedCellEdit {
            module: parse_module(&self.module)?,
            action: parse_action(&self.action)?,
            value: self.value.parse().map_err(errors::domain_error_to_response)?,
            expected: ExpectedVersion::from_option(self.expected_version),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EffectiveQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub module: String,
    pub action: String,
    pub project_id: String,
    pub user_id: String,
    pub role: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub module: ModuleCode,
    pub action: Action,
    pub role: RoleKey,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub allowed: bool,
    pub source: sitegate_auth::DecisionSource,
    pub base_allowed: bool,
    pub user_denied: bool,
    pub reason: String,
}

impl DecisionResponse {
    pub fn new(decision: Decision, project_id: ProjectId, user_id: UserId) -> Self {
        Self {
            reason: decision.reason(),
            module: decision.module,
            action: decision.action,
            role: decision.role,
            project_id,
            user_id,
            allowed: decision.allowed,
            source: decision.source,
            base_allowed: decision.base_allowed,
            user_denied: decision.user_denied,
        }
    }
}

/// Locked cells a write requested as allowed, before they were forced to false.
pub fn coerced_cells(matrix: AllowMatrix) -> Vec<String> {
    let mut m = matrix;
    m.enforce_invariants().iter().map(Cell::to_string).collect()
}

// -------------------------
// Path/query parsing
// -------------------------

pub fn parse_project_id(s: &str) -> Result<ProjectId, axum::response::Response> {
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_user_id(s: &str) -> Result<UserId, axum::response::Response> {
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_role(s: &str) -> Result<RoleKey, axum::response::Response> {
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_module(s: &str) -> Result<ModuleCode, axum::response::Response> {
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_action(s: &str) -> Result<Action, axum::response::Response> {
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn ok_json<T: Serialize>(body: T) -> axum::response::Response {
    use axum::response::IntoResponse;
    (StatusCode::OK, axum::Json(body)).into_response()
}

/// A saved allow grid together with the locked cells that were forced off.
#[derive(Debug, Serialize)]
pub struct SavedGrid<T: Serialize> {
    #[serde(flatten)]
    pub record: T,
    pub coerced_cells: Vec<String>,
}
