//! In-memory permission stores for tests/dev.
//!
//! Records live behind `Arc` inside a `RwLock`ed map. Writers take the write
//! lock, check the expected version, build a fresh record and swap the `Arc`;
//! readers clone the `Arc` out under the read lock. A reader therefore never
//! sees a grid that is being edited.
//!
//! Deleting a record leaves a retired slot holding its last version, so a
//! record re-created after a reset continues the count instead of reusing
//! versions an earlier editor may still hold.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use sitegate_auth::{Action, AllowMatrix, CellOverride, DenyMatrix, ModuleCode, RoleKey};
use sitegate_core::{ExpectedVersion, ProjectId, UserId};

use super::{
    sanitize, ProjectOverride, ProjectOverrideStore, RoleTemplate, RoleTemplateStore, StoreError,
    UserOverride, UserOverrideStore,
};

trait Versioned {
    fn version(&self) -> u64;
}

impl Versioned for RoleTemplate {
    fn version(&self) -> u64 {
        self.version
    }
}

impl Versioned for ProjectOverride {
    fn version(&self) -> u64 {
        self.version
    }
}

impl Versioned for UserOverride {
    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug)]
enum Slot<V> {
    Live(Arc<V>),
    /// Deleted record; keeps its last version.
    Retired(u64),
}

impl<V: Versioned> Slot<V> {
    fn live(&self) -> Option<&Arc<V>> {
        match self {
            Slot::Live(record) => Some(record),
            Slot::Retired(_) => None,
        }
    }

    /// Version a write is checked against: `0` when nothing live is stored.
    fn current_version(&self) -> u64 {
        self.live().map_or(0, |r| r.version())
    }

    fn last_version(&self) -> u64 {
        match self {
            Slot::Live(record) => record.version(),
            Slot::Retired(version) => *version,
        }
    }
}

type Slots<K, V> = HashMap<K, Slot<V>>;

/// Current and next version for a write to `slot`.
fn versions<V: Versioned>(slot: Option<&Slot<V>>) -> (u64, u64) {
    (
        slot.map_or(0, Slot::current_version),
        slot.map_or(0, Slot::last_version) + 1,
    )
}

/// Copy-then-replace map of immutable records keyed by scope key.
#[derive(Debug)]
struct SnapshotMap<K, V> {
    inner: RwLock<Slots<K, V>>,
}

impl<K, V> Default for SnapshotMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Versioned> SnapshotMap<K, V> {
    fn read(&self) -> Result<RwLockReadGuard<'_, Slots<K, V>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Slots<K, V>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn snapshot(&self, key: &K) -> Result<Option<Arc<V>>, StoreError> {
        Ok(self.read()?.get(key).and_then(Slot::live).cloned())
    }

    /// Retire the live record under `key`. Returns whether one existed.
    fn remove(&self, key: &K) -> Result<bool, StoreError> {
        let mut map = self.write()?;
        let Some(slot) = map.get_mut(key) else {
            return Ok(false);
        };
        let Slot::Live(record) = slot else {
            return Ok(false);
        };
        let version = record.version();
        *slot = Slot::Retired(version);
        Ok(true)
    }
}

fn conflict(scope: String, expected: ExpectedVersion, actual: u64) -> StoreError {
    StoreError::Conflict(format!(
        "{scope} was modified concurrently (expected: {expected:?}, actual: {actual})"
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Role templates
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryRoleTemplateStore {
    records: SnapshotMap<RoleKey, RoleTemplate>,
}

impl InMemoryRoleTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed templates without version checks (dev bootstrap, tests).
    pub fn with_templates(templates: impl IntoIterator<Item = (RoleKey, AllowMatrix)>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.write() {
            let now = Utc::now();
            for (role, matrix) in templates {
                let matrix = sanitize(matrix, role.as_str());
                map.insert(
                    role,
                    Slot::Live(Arc::new(RoleTemplate {
                        role,
                        matrix,
                        version: 1,
                        updated_at: Some(now),
                    })),
                );
            }
        }
        store
    }
}

#[async_trait::async_trait]
impl RoleTemplateStore for InMemoryRoleTemplateStore {
    async fn get(&self, role: RoleKey) -> Result<RoleTemplate, StoreError> {
        Ok(self
            .records
            .snapshot(&role)?
            .map(|r| (*r).clone())
            .unwrap_or_else(|| RoleTemplate::default_for(role)))
    }

    async fn put(
        &self,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<RoleTemplate, StoreError> {
        let matrix = sanitize(matrix, role.as_str());
        let mut map = self.records.write()?;

        let (current, next) = versions(map.get(&role));
        if !expected.matches(current) {
            return Err(conflict(format!("role template {role}"), expected, current));
        }

        let record = RoleTemplate {
            role,
            matrix,
            version: next,
            updated_at: Some(Utc::now()),
        };
        map.insert(role, Slot::Live(Arc::new(record.clone())));
        tracing::info!(%role, version = record.version, "role template saved");
        Ok(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Project overrides
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryProjectOverrideStore {
    records: SnapshotMap<(ProjectId, RoleKey), ProjectOverride>,
}

impl InMemoryProjectOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectOverrideStore for InMemoryProjectOverrideStore {
    async fn get(
        &self,
        project_id: ProjectId,
        role: RoleKey,
    ) -> Result<Option<ProjectOverride>, StoreError> {
        Ok(self
            .records
            .snapshot(&(project_id, role))?
            .map(|r| (*r).clone()))
    }

    async fn put(
        &self,
        project_id: ProjectId,
        role: RoleKey,
        matrix: AllowMatrix,
        expected: ExpectedVersion,
    ) -> Result<ProjectOverride, StoreError> {
        let matrix = sanitize(matrix, role.as_str());
        let key = (project_id, role);
        let mut map = self.records.write()?;

        let (current, next) = versions(map.get(&key));
        if !expected.matches(current) {
            return Err(conflict(
                format!("project override {project_id}/{role}"),
                expected,
                current,
            ));
        }

        let record = ProjectOverride {
            project_id,
            role,
            matrix,
            version: next,
            updated_at: Utc::now(),
        };
        map.insert(key, Slot::Live(Arc::new(record.clone())));
        tracing::info!(%project_id, %role, version = record.version, "project override saved");
        Ok(record)
    }

    async fn delete(&self, project_id: ProjectId, role: RoleKey) -> Result<bool, StoreError> {
        self.records.remove(&(project_id, role))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User overrides
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryUserOverrideStore {
    records: SnapshotMap<(ProjectId, UserId), UserOverride>,
}

impl InMemoryUserOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the version and swap in `matrix` under a single write lock.
    fn write_matrix(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        expected: ExpectedVersion,
        edit: impl FnOnce(&DenyMatrix) -> Result<Option<DenyMatrix>, StoreError>,
    ) -> Result<UserOverride, StoreError> {
        let key = (project_id, user_id);
        let mut map = self.records.write()?;

        let slot = map.get(&key);
        let (_, next) = versions(slot);
        let current = slot
            .and_then(Slot::live)
            .cloned()
            .unwrap_or_else(|| Arc::new(UserOverride::empty(project_id, user_id)));
        if !expected.matches(current.version) {
            return Err(conflict(
                format!("user override {project_id}/{user_id}"),
                expected,
                current.version,
            ));
        }

        let Some(matrix) = edit(&current.matrix)? else {
            return Ok((*current).clone());
        };

        let record = UserOverride {
            project_id,
            user_id,
            matrix,
            version: next,
            updated_at: Some(Utc::now()),
        };
        map.insert(key, Slot::Live(Arc::new(record.clone())));
        tracing::info!(
            %project_id,
            %user_id,
            version = record.version,
            denied_cells = record.matrix.len(),
            "user override saved"
        );
        Ok(record)
    }
}

#[async_trait::async_trait]
impl UserOverrideStore for InMemoryUserOverrideStore {
    async fn get(&self, project_id: ProjectId, user_id: UserId) -> Result<UserOverride, StoreError> {
        Ok(self
            .records
            .snapshot(&(project_id, user_id))?
            .map(|r| (*r).clone())
            .unwrap_or_else(|| UserOverride::empty(project_id, user_id)))
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
        self.write_matrix(project_id, user_id, expected, |current| {
            let mut next = current.clone();
            let changed = next.set_cell(module, action, value)?;
            Ok(changed.then_some(next))
        })
    }

    async fn replace(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        matrix: DenyMatrix,
        expected: ExpectedVersion,
    ) -> Result<UserOverride, StoreError> {
        self.write_matrix(project_id, user_id, expected, |_| Ok(Some(matrix)))
    }

    async fn reset(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError> {
        let existed = self.records.remove(&(project_id, user_id))?;
        tracing::info!(%project_id, %user_id, existed, "user override reset");
        Ok(existed)
    }
}
