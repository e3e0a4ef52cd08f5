//! Project membership lookup: which role a user holds in a project.
//!
//! Membership is owned by the assignment workflow, not by this service. The
//! resolver only reads it when a caller does not pass the role explicitly.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use sitegate_auth::RoleKey;
use sitegate_core::{ProjectId, UserId};

use crate::store::StoreError;

/// One assignment of a user to a project under a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMembership {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub role: RoleKey,
}

#[async_trait::async_trait]
pub trait MembershipLookup: Send + Sync {
    /// Every role the user holds in the project, deduplicated. Empty when the
    /// user is not a member.
    async fn roles(&self, project_id: ProjectId, user_id: UserId) -> Result<Vec<RoleKey>, StoreError>;
}

#[async_trait::async_trait]
impl<S> MembershipLookup for Arc<S>
where
    S: MembershipLookup + ?Sized,
{
    async fn roles(&self, project_id: ProjectId, user_id: UserId) -> Result<Vec<RoleKey>, StoreError> {
        (**self).roles(project_id, user_id).await
    }
}

/// In-memory membership directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMembershipDirectory {
    inner: RwLock<HashMap<(ProjectId, UserId), BTreeSet<RoleKey>>>,
}

impl InMemoryMembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_memberships(memberships: impl IntoIterator<Item = ProjectMembership>) -> Self {
        let mut map: HashMap<(ProjectId, UserId), BTreeSet<RoleKey>> = HashMap::new();
        for m in memberships {
            map.entry((m.project_id, m.user_id)).or_default().insert(m.role);
        }
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Load a JSON array of `{ "project_id", "user_id", "role" }` objects.
    pub fn load_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read memberships file {}", path.display()))?;
        let memberships: Vec<ProjectMembership> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid memberships file {}", path.display()))?;
        tracing::info!(path = %path.display(), count = memberships.len(), "loaded project memberships");
        Ok(Self::from_memberships(memberships))
    }

    pub fn insert(&self, membership: ProjectMembership) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        guard
            .entry((membership.project_id, membership.user_id))
            .or_default()
            .insert(membership.role);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MembershipLookup for InMemoryMembershipDirectory {
    async fn roles(&self, project_id: ProjectId, user_id: UserId) -> Result<Vec<RoleKey>, StoreError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(guard
            .get(&(project_id, user_id))
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default())
    }
}
