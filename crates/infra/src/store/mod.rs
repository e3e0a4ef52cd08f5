//! Permission grid storage: role templates, project overrides, user denies.
//!
//! Every store replaces whole records per scope key. A writer never edits a
//! grid another reader may hold; it builds a new record from a copy of the old
//! one and swaps it in, so readers observe either the old or the new grid.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use sitegate_auth::{Action, AllowMatrix, CellOverride, DenyMatrix, ModuleCode, RoleKey};
use sitegate_core::{DomainError, ExpectedVersion, ProjectId, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{
    InMemoryProjectOverrideStore, InMemoryRoleTemplateStore, InMemoryUserOverrideStore,
};
pub use postgres::PostgresPermissionStore;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        let DomainError::Validation(msg) = value;
        StoreError::Validation(msg)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Default allow grid for a role.
///
/// `version == 0` means the role has never been saved and the grid is the
/// all-false default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleTemplate {
    pub role: RoleKey,
    pub matrix: AllowMatrix,
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RoleTemplate {
    pub fn default_for(role: RoleKey) -> Self {
        Self {
            role,
            matrix: AllowMatrix::all_false(),
            version: 0,
            updated_at: None,
        }
    }
}

/// Per-(project, role) grid that fully replaces the role template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectOverride {
    pub project_id: ProjectId,
    pub role: RoleKey,
    pub matrix: AllowMatrix,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Per-(project, user) sparse deny grid.
///
/// A user with no stored row is represented with an empty matrix and version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserOverride {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub matrix: DenyMatrix,
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserOverride {
    pub fn empty(project_id: ProjectId, user_id: UserId) -> Self {
        Self {
            project_id,
            user_id,
            matrix: DenyMatrix::new(),
            version: 0,
            updated_at: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store traits
// ─────────────────────────────────────────────────────────────────────────────

/// One allow grid per role. Templates are overwritten, never deleted.
#[async_trait::async_trait]
pub trait RoleTemplateStore: Send + Sync {
    /// Stored template, or the all-false default when none was saved yet.
    async fn get(&self, role: RoleKey) -> Result<RoleTemplate, StoreError>;

    /// Replace the template. Locked cells are forced to false.
    async fn put(
        &self,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<RoleTemplate, StoreError>;

    /// All roles in registry order, defaulted where unsaved.
    async fn list(&self) -> Result<Vec<RoleTemplate>, StoreError> {
        let mut out = Vec::with_capacity(RoleKey::ALL.len());
        for role in RoleKey::ALL {
            out.push(self.get(role).await?);
        }
        Ok(out)
    }
}

/// Zero or one allow grid per (project, role).
#[async_trait::async_trait]
pub trait ProjectOverrideStore: Send + Sync {
    /// `None` means "no customization"; it is not an all-false grid.
    async fn get(
        &self,
        project_id: ProjectId,
        role: RoleKey,
    ) -> Result<Option<ProjectOverride>, StoreError>;

    /// Create or fully replace the override. Locked cells are forced to false.
    async fn put(
        &self,
        project_id: ProjectId,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<ProjectOverride, StoreError>;

    /// Remove the override. Returns whether a row existed.
    async fn delete(&self, project_id: ProjectId, role: RoleKey) -> Result<bool, StoreError>;
}

/// Sparse deny grid per (project, user).
#[async_trait::async_trait]
pub trait UserOverrideStore: Send + Sync {
    async fn get(&self, project_id: ProjectId, user_id: UserId) -> Result<UserOverride, StoreError>;

    /// Edit a single cell. Locked cells are a validation error.
    async fn set_cell(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        module: ModuleCode,
        action: Action,
        value: CellOverride,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError>;

    /// Replace the whole deny grid.
    async fn replace(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        matrix: DenyMatrix,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError>;

    /// Delete the row. Returns whether a row existed.
    async fn reset(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError>;
}

/// Delete a project override and return the template that now applies.
pub async fn reset_to_template<P, T>(
    overrides: &P,
    templates: &T,
    project_id: ProjectId,
    role: RoleKey,
) -> Result<RoleTemplate, StoreError>
where
    P: ProjectOverrideStore + ?Sized,
    T: RoleTemplateStore + ?Sized,
{
    let existed = overrides.delete(project_id, role).await?;
    tracing::info!(%project_id, %role, existed, "project override reset to role template");
    templates.get(role).await
}

/// Log coerced locked cells after enforcing invariants on an incoming grid.
pub(crate) fn sanitize(mut matrix: AllowMatrix, scope: &str) -> AllowMatrix {
    let coerced = matrix.enforce_invariants();
    if !coerced.is_empty() {
        let cells: Vec<String> = coerced.iter().map(ToString::to_string).collect();
        tracing::warn!(scope, ?cells, "locked cells requested as allowed; forced to false");
    }
    matrix
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared-pointer forwarding
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl<S> RoleTemplateStore for Arc<S>
where
    S: RoleTemplateStore + ?Sized,
{
    async fn get(&self, role: RoleKey) -> Result<RoleTemplate, StoreError> {
        (**self).get(role).await
    }

    async fn put(
        &self,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<RoleTemplate, StoreError> {
        (**self).put(role, matrix, expected).await
    }

    async fn list(&self) -> Result<Vec<RoleTemplate>, StoreError> {
        (**self).list().await
    }
}

#[async_trait::async_trait]
impl<S> ProjectOverrideStore for Arc<S>
where
    S: ProjectOverrideStore + ?Sized,
{
    async fn get(
        &self,
        project_id: ProjectId,
        role: RoleKey,
    ) -> Result<Option<ProjectOverride>, StoreError> {
        (**self).get(project_id, role).await
    }

    async fn put(
        &self,
        project_id: ProjectId,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<ProjectOverride, StoreError> {
        (**self).put(project_id, role, matrix, expected).await
    }

    async fn delete(&self, project_id: ProjectId, role: RoleKey) -> Result<bool, StoreError> {
        (**self).delete(project_id, role).await
    }
}

#[async_trait::async_trait]
impl<S> UserOverrideStore for Arc<S>
where
    S: UserOverrideStore + ?Sized,
{
    async fn get(&self, project_id: ProjectId, user_id: UserId) -> Result<UserOverride, StoreError> {
        (**self).get(project_id, user_id).await
    }

    async fn set_cell(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        module: ModuleCode,
        action: Action,
        value: CellOverride,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError> {
        (**self)
            .set_cell(project_id, user_id, module, action, value, expected)
            .await
    }

    async fn replace(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        matrix: DenyMatrix,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError> {
        (**self).replace(project_id, user_id, matrix, expected).await
    }

    async fn reset(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError> {
        (**self).reset(project_id, user_id).await
    }
}
