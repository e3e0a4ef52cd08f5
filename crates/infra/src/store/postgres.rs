//! Postgres-backed permission stores.
//!
//! Grids are persisted as JSONB in their wire form, one row per scope key.
//! Writes are single statements (or a single transaction for cell edits), so a
//! concurrent reader sees either the previous row or the new one.
//!
//! ## Optimistic Concurrency
//!
//! | Expectation | Statement | Lost race surfaces as |
//! |---|---|---|
//! | `Any` | `INSERT .. ON CONFLICT DO UPDATE` (version + 1) | never (last write wins) |
//! | `Exact(0)` | `INSERT .. ON CONFLICT DO UPDATE .. WHERE matrix IS NULL` | no row returned -> `Conflict` |
//! | `Exact(n)` | `UPDATE .. WHERE version = n AND matrix IS NOT NULL` | no row returned -> `Conflict` |
//!
//! Unique violations (`23505`) from racing inserts also map to `Conflict`.
//!
//! Resetting an override sets its `matrix` to NULL and keeps the row, so the
//! version keeps counting when the override is saved again. A reset row reads
//! as absent (version 0).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use sitegate_auth::{is_locked, Action, AllowMatrix, Cell, CellOverride, DenyMatrix, ModuleCode, RoleKey};
use sitegate_core::{ExpectedVersion, ProjectId, UserId};

use crate::membership::MembershipLookup;

use super::{
    sanitize, ProjectOverride, ProjectOverrideStore, RoleTemplate, RoleTemplateStore, StoreError,
    UserOverride, UserOverrideStore,
};

const MIGRATION: &str = include_str!("../../migrations/0001_permission_grid.sql");

#[derive(Debug, Clone, Copy)]
struct Table {
    name: &'static str,
    keys: &'static [&'static str],
}

const ROLE_TEMPLATES: Table = Table {
    name: "role_templates",
    keys: &["role"],
};

const PROJECT_OVERRIDES: Table = Table {
    name: "project_role_overrides",
    keys: &["project_id", "role"],
};

const USER_OVERRIDES: Table = Table {
    name: "project_user_overrides",
    keys: &["project_id", "user_id"],
};

#[derive(Debug, Clone, Copy)]
enum Key {
    Text(&'static str),
    Uuid(Uuid),
}

/// A row as stored; `matrix` is `None` once the record was reset.
struct StoredRow {
    matrix: Option<JsonValue>,
    version: u64,
    updated_at: DateTime<Utc>,
}

struct LiveRow {
    matrix: JsonValue,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl StoredRow {
    fn live(self) -> Option<LiveRow> {
        Some(LiveRow {
            matrix: self.matrix?,
            version: self.version,
            updated_at: self.updated_at,
        })
    }
}

fn key_filter(table: Table) -> String {
    table
        .keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{k} = ${}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_params(table: Table) -> String {
    (1..=table.keys.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the write statement for a versioned replace.
///
/// Parameters: keys `$1..$n`, matrix `$n+1`, updated_at `$n+2`, and for
/// `Exact(v > 0)` the expected version `$n+3`.
fn write_sql(table: Table, expected: ExpectedVersion) -> String {
    let n = table.keys.len();
    let name = table.name;
    let key_cols = table.keys.join(", ");
    let key_params = key_params(table);
    let (matrix, ts) = (n + 1, n + 2);

    match expected {
        ExpectedVersion::Any => format!(
            "INSERT INTO {name} ({key_cols}, matrix, version, updated_at) \
             VALUES ({key_params}, ${matrix}, 1, ${ts}) \
             ON CONFLICT ({key_cols}) DO UPDATE \
             SET matrix = EXCLUDED.matrix, version = {name}.version + 1, updated_at = EXCLUDED.updated_at \
             RETURNING version"
        ),
        ExpectedVersion::Exact(0) => format!(
            "INSERT INTO {name} ({key_cols}, matrix, version, updated_at) \
             VALUES ({key_params}, ${matrix}, 1, ${ts}) \
             ON CONFLICT ({key_cols}) DO UPDATE \
             SET matrix = EXCLUDED.matrix, version = {name}.version + 1, updated_at = EXCLUDED.updated_at \
             WHERE {name}.matrix IS NULL \
             RETURNING version"
        ),
        ExpectedVersion::Exact(_) => {
            let filter = key_filter(table);
            format!(
                "UPDATE {name} SET matrix = ${matrix}, version = version + 1, updated_at = ${ts} \
                 WHERE {filter} AND version = ${} AND matrix IS NOT NULL \
                 RETURNING version",
                n + 3
            )
        }
    }
}

fn select_sql(table: Table, for_update: bool) -> String {
    let filter = key_filter(table);
    let lock = if for_update { " FOR UPDATE" } else { "" };
    format!(
        "SELECT matrix, version, updated_at FROM {} WHERE {filter}{lock}",
        table.name
    )
}

/// Clear the matrix of a live row, keeping its version.
fn retire_sql(table: Table) -> String {
    let filter = key_filter(table);
    format!(
        "UPDATE {} SET matrix = NULL WHERE {filter} AND matrix IS NOT NULL",
        table.name
    )
}

/// Make sure a row exists to lock. Parameters: keys, then updated_at.
fn placeholder_sql(table: Table) -> String {
    let n = table.keys.len();
    let key_cols = table.keys.join(", ");
    format!(
        "INSERT INTO {} ({key_cols}, matrix, version, updated_at) \
         VALUES ({}, NULL, 0, ${}) \
         ON CONFLICT ({key_cols}) DO NOTHING",
        table.name,
        key_params(table),
        n + 1
    )
}

/// Write a row already locked by the caller. Parameters: keys, matrix, updated_at.
fn locked_update_sql(table: Table) -> String {
    let n = table.keys.len();
    format!(
        "UPDATE {} SET matrix = ${}, version = version + 1, updated_at = ${} \
         WHERE {} \
         RETURNING version",
        table.name,
        n + 1,
        n + 2,
        key_filter(table)
    )
}

fn bind_keys<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    keys: &[Key],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for key in keys {
        query = match *key {
            Key::Text(s) => query.bind(s),
            Key::Uuid(u) => query.bind(u),
        };
    }
    query
}

fn decode_row(row: &sqlx::postgres::PgRow, operation: &str) -> Result<StoredRow, StoreError> {
    let matrix: Option<JsonValue> = row
        .try_get("matrix")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(StoredRow {
        matrix,
        version: version as u64,
        updated_at,
    })
}

fn decode_matrix<T: serde::de::DeserializeOwned>(value: JsonValue, scope: &str) -> Result<T, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Backend(format!("stored matrix for {scope} is unreadable: {e}")))
}

fn encode_matrix<T: serde::Serialize>(matrix: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(matrix).map_err(|e| StoreError::Backend(format!("failed to encode matrix: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: a racing insert for the same scope key.
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Postgres-backed implementation of all three permission stores and of the
/// membership lookup (read-only over `project_memberships`).
#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the permission tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Live row for `keys`; reset rows read as absent.
    async fn fetch(&self, table: Table, keys: &[Key], operation: &str) -> Result<Option<LiveRow>, StoreError> {
        let sql = select_sql(table, false);
        let row = bind_keys(sqlx::query(&sql), keys)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(row
            .map(|r| decode_row(&r, operation))
            .transpose()?
            .and_then(StoredRow::live))
    }

    async fn versioned_write(
        &self,
        table: Table,
        keys: &[Key],
        matrix: JsonValue,
        expected: ExpectedVersion,
        scope: &str,
    ) -> Result<(u64, DateTime<Utc>), StoreError> {
        let sql = write_sql(table, expected);
        let now = Utc::now();

        let mut query = bind_keys(sqlx::query(&sql), keys).bind(matrix).bind(now);
        if let ExpectedVersion::Exact(v) = expected {
            if v > 0 {
                query = query.bind(v as i64);
            }
        }

        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(table.name, e))?;

        match row {
            Some(row) => {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| map_sqlx_error(table.name, e))?;
                Ok((version as u64, now))
            }
            None => Err(StoreError::Conflict(format!(
                "{scope} was modified concurrently (expected: {expected:?})"
            ))),
        }
    }

    async fn retire_row(&self, table: Table, keys: &[Key]) -> Result<bool, StoreError> {
        let sql = retire_sql(table);
        let result = bind_keys(sqlx::query(&sql), keys)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(table.name, e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl RoleTemplateStore for PostgresPermissionStore {
    #[instrument(skip(self), fields(role = %role), err)]
    async fn get(&self, role: RoleKey) -> Result<RoleTemplate, StoreError> {
        let keys = [Key::Text(role.as_str())];
        match self.fetch(ROLE_TEMPLATES, &keys, "get_role_template").await? {
            Some(row) => Ok(RoleTemplate {
                role,
                matrix: decode_matrix(row.matrix, role.as_str())?,
                version: row.version,
                updated_at: Some(row.updated_at),
            }),
            None => Ok(RoleTemplate::default_for(role)),
        }
    }

    #[instrument(skip(self, matrix), fields(role = %role, expected = ?expected), err)]
    async fn put(
        &self,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<RoleTemplate, StoreError> {
        let matrix = sanitize(matrix, role.as_str());
        let keys = [Key::Text(role.as_str())];
        let scope = format!("role template {role}");
        let (version, updated_at) = self
            .versioned_write(ROLE_TEMPLATES, &keys, encode_matrix(&matrix)?, expected, &scope)
            .await?;
        tracing::info!(%role, version, "role template saved");
        Ok(RoleTemplate {
            role,
            matrix,
            version,
            updated_at: Some(updated_at),
        })
    }
}

#[async_trait::async_trait]
impl ProjectOverrideStore for PostgresPermissionStore {
    #[instrument(skip(self), fields(project_id = %project_id, role = %role), err)]
    async fn get(
        &self,
        project_id: ProjectId,
        role: RoleKey,
    ) -> Result<Option<ProjectOverride>, StoreError> {
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Text(role.as_str())];
        let Some(row) = self.fetch(PROJECT_OVERRIDES, &keys, "get_project_override").await? else {
            return Ok(None);
        };
        Ok(Some(ProjectOverride {
            project_id,
            role,
            matrix: decode_matrix(row.matrix, &format!("{project_id}/{role}"))?,
            version: row.version,
            updated_at: row.updated_at,
        }))
    }

    #[instrument(skip(self, matrix), fields(project_id = %project_id, role = %role, expected = ?expected), err)]
    async fn put(
        &self,
        project_id: ProjectId,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<ProjectOverride, StoreError> {
        let matrix = sanitize(matrix, role.as_str());
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Text(role.as_str())];
        let scope = format!("project override {project_id}/{role}");
        let (version, updated_at) = self
            .versioned_write(PROJECT_OVERRIDES, &keys, encode_matrix(&matrix)?, expected, &scope)
            .await?;
        tracing::info!(%project_id, %role, version, "project override saved");
        Ok(ProjectOverride {
            project_id,
            role,
            matrix,
            version,
            updated_at,
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id, role = %role), err)]
    async fn delete(&self, project_id: ProjectId, role: RoleKey) -> Result<bool, StoreError> {
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Text(role.as_str())];
        self.retire_row(PROJECT_OVERRIDES, &keys).await
    }
}

#[async_trait::async_trait]
impl UserOverrideStore for PostgresPermissionStore {
    #[instrument(skip(self), fields(project_id = %project_id, user_id = %user_id), err)]
    async fn get(&self, project_id: ProjectId, user_id: UserId) -> Result<UserOverride, StoreError> {
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Uuid(*user_id.as_uuid())];
        let Some(row) = self.fetch(USER_OVERRIDES, &keys, "get_user_override").await? else {
            return Ok(UserOverride::empty(project_id, user_id));
        };
        Ok(UserOverride {
            project_id,
            user_id,
            matrix: decode_matrix(row.matrix, &format!("{project_id}/{user_id}"))?,
            version: row.version,
            updated_at: Some(row.updated_at),
        })
    }

    #[instrument(
        skip(self),
        fields(project_id = %project_id, user_id = %user_id, module = %module, action = %action),
        err
    )]
    async fn set_cell(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        module: ModuleCode,
        action: Action,
        value: CellOverride,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError> {
        if is_locked(module, action) {
            return Err(StoreError::Validation(format!(
                "{} is always denied and cannot be overridden per user",
                Cell::new(module, action)
            )));
        }

        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Uuid(*user_id.as_uuid())];
        let scope = format!("{project_id}/{user_id}");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_set_cell", e))?;

        // With no row yet, FOR UPDATE would lock nothing and two first edits
        // would race. Insert a version-0 row first; a concurrent inserter
        // blocks on it until this transaction ends.
        let now = Utc::now();
        let placeholder = placeholder_sql(USER_OVERRIDES);
        bind_keys(sqlx::query(&placeholder), &keys)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user_override", e))?;

        let select = select_sql(USER_OVERRIDES, true);
        let locked = bind_keys(sqlx::query(&select), &keys)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user_override", e))?;
        let locked = decode_row(&locked, "lock_user_override")?;

        let current = match locked.live() {
            Some(row) => UserOverride {
                project_id,
                user_id,
                matrix: decode_matrix(row.matrix, &scope)?,
                version: row.version,
                updated_at: Some(row.updated_at),
            },
            None => UserOverride::empty(project_id, user_id),
        };

        if !expected.matches(current.version) {
            return Err(StoreError::Conflict(format!(
                "user override {scope} was modified concurrently (expected: {expected:?}, actual: {})",
                current.version
            )));
        }

        let mut next = current.matrix.clone();
        if !next.set_cell(module, action, value)? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_set_cell", e))?;
            return Ok(current);
        }

        let write = locked_update_sql(USER_OVERRIDES);
        let row = bind_keys(sqlx::query(&write), &keys)
            .bind(encode_matrix(&next)?)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_user_override_cell", e))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("set_user_override_cell", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_set_cell", e))?;

        tracing::info!(%project_id, %user_id, version, denied_cells = next.len(), "user override saved");
        Ok(UserOverride {
            project_id,
            user_id,
            matrix: next,
            version: version as u64,
            updated_at: Some(now),
        })
    }

    #[instrument(skip(self, matrix), fields(project_id = %project_id, user_id = %user_id, expected = ?expected), err)]
    async fn replace(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        matrix: DenyMatrix,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError> {
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Uuid(*user_id.as_uuid())];
        let scope = format!("user override {project_id}/{user_id}");
        let (version, updated_at) = self
            .versioned_write(USER_OVERRIDES, &keys, encode_matrix(&matrix)?, expected, &scope)
            .await?;
        tracing::info!(%project_id, %user_id, version, denied_cells = matrix.len(), "user override saved");
        Ok(UserOverride {
            project_id,
            user_id,
            matrix,
            version,
            updated_at: Some(updated_at),
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id, user_id = %user_id), err)]
    async fn reset(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError> {
        let keys = [Key::Uuid(*project_id.as_uuid()), Key::Uuid(*user_id.as_uuid())];
        self.retire_row(USER_OVERRIDES, &keys).await
    }
}

#[async_trait::async_trait]
impl MembershipLookup for PostgresPermissionStore {
    #[instrument(skip(self), fields(project_id = %project_id, user_id = %user_id), err)]
    async fn roles(&self, project_id: ProjectId, user_id: UserId) -> Result<Vec<RoleKey>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role
            FROM project_memberships
            WHERE project_id = $1 AND user_id = $2
            ORDER BY role
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_memberships", e))?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row
                .try_get("role")
                .map_err(|e| map_sqlx_error("get_memberships", e))?;
            let role: RoleKey = raw.parse().map_err(|_| {
                StoreError::Backend(format!("membership row carries unknown role '{raw}'"))
            })?;
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_write_is_an_upsert() {
        let sql = write_sql(PROJECT_OVERRIDES, ExpectedVersion::Any);
        assert!(sql.starts_with("INSERT INTO project_role_overrides (project_id, role, matrix, version, updated_at)"));
        assert!(sql.contains("VALUES ($1, $2, $3, 1, $4)"));
        assert!(sql.contains("ON CONFLICT (project_id, role) DO UPDATE"));
        assert!(sql.contains("version = project_role_overrides.version + 1"));
    }

    #[test]
    fn first_write_only_fills_absent_or_reset_rows() {
        let sql = write_sql(PROJECT_OVERRIDES, ExpectedVersion::Exact(0));
        assert!(sql.contains("VALUES ($1, $2, $3, 1, $4)"));
        assert!(sql.contains("version = project_role_overrides.version + 1"));
        assert!(sql.ends_with("WHERE project_role_overrides.matrix IS NULL RETURNING version"));
    }

    #[test]
    fn versioned_write_filters_on_expected_version() {
        let sql = write_sql(USER_OVERRIDES, ExpectedVersion::Exact(4));
        assert!(sql.starts_with("UPDATE project_user_overrides SET matrix = $3"));
        assert!(sql.contains("WHERE project_id = $1 AND user_id = $2 AND version = $5 AND matrix IS NOT NULL"));
    }

    #[test]
    fn reset_keeps_the_row_and_its_version() {
        assert_eq!(
            retire_sql(PROJECT_OVERRIDES),
            "UPDATE project_role_overrides SET matrix = NULL WHERE project_id = $1 AND role = $2 AND matrix IS NOT NULL"
        );
    }

    #[test]
    fn cell_edit_locks_a_row_even_before_the_first_write() {
        assert_eq!(
            placeholder_sql(USER_OVERRIDES),
            "INSERT INTO project_user_overrides (project_id, user_id, matrix, version, updated_at) \
             VALUES ($1, $2, NULL, 0, $3) ON CONFLICT (project_id, user_id) DO NOTHING"
        );
        assert_eq!(
            select_sql(USER_OVERRIDES, true),
            "SELECT matrix, version, updated_at FROM project_user_overrides WHERE project_id = $1 AND user_id = $2 FOR UPDATE"
        );
        assert_eq!(
            locked_update_sql(USER_OVERRIDES),
            "UPDATE project_user_overrides SET matrix = $3, version = version + 1, updated_at = $4 \
             WHERE project_id = $1 AND user_id = $2 RETURNING version"
        );
    }

    #[test]
    fn reset_row_reads_as_absent() {
        let now = Utc::now();
        let reset = StoredRow {
            matrix: None,
            version: 3,
            updated_at: now,
        };
        assert!(reset.live().is_none());

        let live = StoredRow {
            matrix: Some(serde_json::json!({})),
            version: 4,
            updated_at: now,
        };
        assert_eq!(live.live().map(|r| r.version), Some(4));
    }
}
