//! Permission resolver: loads the three grid layers and combines them.
//!
//! The combination rule itself lives in `sitegate_auth::decide`; this service
//! owns the IO around it. Locked cells are answered before any store is read.
//! The three layer reads have no ordering dependency and run concurrently.

use thiserror::Error;

use sitegate_auth::{
    check_locked, decide, effective_matrix, Action, AllowMatrix, BaseLayer, Decision, ModuleCode,
    RoleKey,
};
use sitegate_core::{DomainError, ProjectId, UserId};

use crate::membership::MembershipLookup;
use crate::store::{
    self, ProjectOverride, ProjectOverrideStore, RoleTemplate, RoleTemplateStore, StoreError,
    UserOverride, UserOverrideStore,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("user {user_id} holds no membership in project {project_id}")]
    MembershipNotFound { project_id: ProjectId, user_id: UserId },

    #[error("user {user_id} holds several roles in project {project_id}: {roles:?}; pass the role explicitly")]
    AmbiguousMembership {
        project_id: ProjectId,
        user_id: UserId,
        roles: Vec<RoleKey>,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ResolveError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Validation(msg) => ResolveError::Validation(msg),
            other => ResolveError::Store(other),
        }
    }
}

impl From<DomainError> for ResolveError {
    fn from(value: DomainError) -> Self {
        let DomainError::Validation(msg) = value;
        ResolveError::Validation(msg)
    }
}

/// All three layers for one (role, project, user), read as one unit.
#[derive(Debug, Clone)]
pub struct LayerSnapshot {
    pub template: RoleTemplate,
    pub project_override: Option<ProjectOverride>,
    pub user_override: UserOverride,
}

impl LayerSnapshot {
    pub fn base(&self) -> BaseLayer<'_> {
        BaseLayer::select(
            self.project_override.as_ref().map(|o| &o.matrix),
            &self.template.matrix,
        )
    }
}

#[derive(Debug, Clone)]
pub struct PermissionResolver<T, P, U, M> {
    templates: T,
    project_overrides: P,
    user_overrides: U,
    memberships: M,
}

impl<T, P, U, M> PermissionResolver<T, P, U, M>
where
    T: RoleTemplateStore,
    P: ProjectOverrideStore,
    U: UserOverrideStore,
    M: MembershipLookup,
{
    pub fn new(templates: T, project_overrides: P, user_overrides: U, memberships: M) -> Self {
        Self {
            templates,
            project_overrides,
            user_overrides,
            memberships,
        }
    }

    pub fn templates(&self) -> &T {
        &self.templates
    }

    pub fn project_overrides(&self) -> &P {
        &self.project_overrides
    }

    pub fn user_overrides(&self) -> &U {
        &self.user_overrides
    }

    /// Read the template, project override and user denies concurrently.
    pub async fn load_layers(
        &self,
        role: RoleKey,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<LayerSnapshot, ResolveError> {
        let (template, project_override, user_override) = tokio::try_join!(
            self.templates.get(role),
            self.project_overrides.get(project_id, role),
            self.user_overrides.get(project_id, user_id),
        )?;
        Ok(LayerSnapshot {
            template,
            project_override,
            user_override,
        })
    }

    /// Effective decision for one cell, with the layer that produced it.
    pub async fn explain(
        &self,
        module: ModuleCode,
        action: Action,
        role: RoleKey,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Decision, ResolveError> {
        if let Some(locked) = check_locked(module, action, role) {
            tracing::debug!(%module, %action, %role, "locked cell; no store consulted");
            return Ok(locked);
        }

        let layers = self.load_layers(role, project_id, user_id).await?;
        let decision = decide(module, action, role, layers.base(), &layers.user_override.matrix);

        tracing::debug!(
            %module,
            %action,
            %role,
            %project_id,
            %user_id,
            allowed = decision.allowed,
            source = ?decision.source,
            user_denied = decision.user_denied,
            "permission resolved"
        );
        Ok(decision)
    }

    pub async fn resolve(
        &self,
        module: ModuleCode,
        action: Action,
        role: RoleKey,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<bool, ResolveError> {
        Ok(self
            .explain(module, action, role, project_id, user_id)
            .await?
            .allowed)
    }

    /// `resolve` over raw keys as they arrive from the wire.
    pub async fn resolve_str(
        &self,
        module: &str,
        action: &str,
        role: &str,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<bool, ResolveError> {
        let module: ModuleCode = module.parse()?;
        let action: Action = action.parse()?;
        let role: RoleKey = role.parse()?;
        self.resolve(module, action, role, project_id, user_id).await
    }

    /// Every cell at once; the starting state of the user-override editor.
    pub async fn resolve_effective_matrix(
        &self,
        role: RoleKey,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<AllowMatrix, ResolveError> {
        let layers = self.load_layers(role, project_id, user_id).await?;
        Ok(effective_matrix(layers.base(), &layers.user_override.matrix))
    }

    /// The single role the user holds in the project.
    ///
    /// No membership is `MembershipNotFound`; more than one role is
    /// `AmbiguousMembership`. Neither case is defaulted.
    pub async fn role_for(&self, project_id: ProjectId, user_id: UserId) -> Result<RoleKey, ResolveError> {
        let roles = self.memberships.roles(project_id, user_id).await?;
        match roles.as_slice() {
            [] => Err(ResolveError::MembershipNotFound {
                project_id,
                user_id,
            }),
            [role] => Ok(*role),
            _ => Err(ResolveError::AmbiguousMembership {
                project_id,
                user_id,
                roles,
            }),
        }
    }

    /// Authorization check with the role taken from project membership.
    pub async fn check(
        &self,
        module: ModuleCode,
        action: Action,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Decision, ResolveError> {
        let role = self.role_for(project_id, user_id).await?;
        self.explain(module, action, role, project_id, user_id).await
    }

    /// Drop the project override and return the template that now applies.
    pub async fn reset_to_template(
        &self,
        project_id: ProjectId,
        role: RoleKey,
    ) -> Result<RoleTemplate, ResolveError> {
        Ok(store::reset_to_template(&self.project_overrides, &self.templates, project_id, role).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::membership::{InMemoryMembershipDirectory, ProjectMembership};
    use crate::store::{InMemoryProjectOverrideStore, InMemoryRoleTemplateStore, InMemoryUserOverrideStore};
    use sitegate_auth::DecisionSource;
    use sitegate_core::ExpectedVersion;

    /// Template store that counts reads, to prove locked cells never hit it.
    #[derive(Default)]
    struct CountingTemplates {
        inner: InMemoryRoleTemplateStore,
        reads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RoleTemplateStore for CountingTemplates {
        async fn get(&self, role: RoleKey) -> Result<RoleTemplate, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(role).await
        }

        async fn put(
            &self,
            role: RoleKey,
            matrix: AllowMatrix,
            expected: ExpectedVersion,
        ) -> Result<RoleTemplate, StoreError> {
            self.inner.put(role, matrix, expected).await
        }
    }

    struct FailingUserOverrides;

    #[async_trait::async_trait]
    impl UserOverrideStore for FailingUserOverrides {
        async fn get(&self, _: ProjectId, _: UserId) -> Result<UserOverride, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn set_cell(
            &self,
            _: ProjectId,
            _: UserId,
            _: ModuleCode,
            _: Action,
            _: sitegate_auth::CellOverride,
            _: ExpectedVersion,
        ) -> Result<UserOverride, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn replace(
            &self,
            _: ProjectId,
            _: UserId,
            _: sitegate_auth::DenyMatrix,
            _: ExpectedVersion,
        ) -> Result<UserOverride, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn reset(&self, _: ProjectId, _: UserId) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn locked_cell_is_answered_without_reading_stores() {
        let templates = Arc::new(CountingTemplates::default());
        let resolver = PermissionResolver::new(
            templates.clone(),
            InMemoryProjectOverrideStore::new(),
            FailingUserOverrides,
            InMemoryMembershipDirectory::new(),
        );

        let d = resolver
            .explain(ModuleCode::Ltr, Action::Review, RoleKey::Pmc, ProjectId::new(), UserId::new())
            .await
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.source, DecisionSource::LockedInvariant);
        assert_eq!(templates.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failures_propagate_instead_of_denying() {
        let resolver = PermissionResolver::new(
            InMemoryRoleTemplateStore::new(),
            InMemoryProjectOverrideStore::new(),
            FailingUserOverrides,
            InMemoryMembershipDirectory::new(),
        );

        let err = resolver
            .resolve(ModuleCode::Wir, Action::View, RoleKey::Client, ProjectId::new(), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Store(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn unknown_wire_keys_are_validation_errors() {
        let resolver = PermissionResolver::new(
            InMemoryRoleTemplateStore::new(),
            InMemoryProjectOverrideStore::new(),
            InMemoryUserOverrideStore::new(),
            InMemoryMembershipDirectory::new(),
        );
        let (p, u) = (ProjectId::new(), UserId::new());

        let err = resolver.resolve_str("XYZ", "view", "Client", p, u).await.unwrap_err();
        assert_eq!(err, ResolveError::Validation("unknown module code 'XYZ'".to_string()));

        let err = resolver.resolve_str("WIR", "delete", "Client", p, u).await.unwrap_err();
        assert_eq!(err, ResolveError::Validation("unknown action 'delete'".to_string()));

        let err = resolver.resolve_str("WIR", "view", "Owner", p, u).await.unwrap_err();
        assert_eq!(err, ResolveError::Validation("unknown role 'Owner'".to_string()));

        assert!(!resolver.resolve_str("WIR", "view", "Client", p, u).await.unwrap());
    }

    #[tokio::test]
    async fn check_requires_exactly_one_membership() {
        let (p, single, multi, outsider) = (ProjectId::new(), UserId::new(), UserId::new(), UserId::new());
        let memberships = InMemoryMembershipDirectory::from_memberships([
            ProjectMembership { project_id: p, user_id: single, role: RoleKey::Contractor },
            ProjectMembership { project_id: p, user_id: multi, role: RoleKey::Contractor },
            ProjectMembership { project_id: p, user_id: multi, role: RoleKey::Consultant },
        ]);
        let templates = InMemoryRoleTemplateStore::with_templates([(
            RoleKey::Contractor,
            AllowMatrix::all_false().with(ModuleCode::Wir, Action::Raise, true),
        )]);
        let resolver = PermissionResolver::new(
            templates,
            InMemoryProjectOverrideStore::new(),
            InMemoryUserOverrideStore::new(),
            memberships,
        );

        let d = resolver.check(ModuleCode::Wir, Action::Raise, p, single).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.role, RoleKey::Contractor);

        let err = resolver.check(ModuleCode::Wir, Action::Raise, p, outsider).await.unwrap_err();
        assert_eq!(err, ResolveError::MembershipNotFound { project_id: p, user_id: outsider });

        let err = resolver.check(ModuleCode::Wir, Action::Raise, p, multi).await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::AmbiguousMembership {
                project_id: p,
                user_id: multi,
                roles: vec![RoleKey::Contractor, RoleKey::Consultant],
            }
        );
    }
}
