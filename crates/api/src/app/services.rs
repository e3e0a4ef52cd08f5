//! Store and resolver wiring for the HTTP layer.
//!
//! Handlers see stores only as trait objects, so the same routes serve the
//! in-memory and the Postgres backends.

use std::sync::Arc;

use anyhow::Context;

use sitegate_infra::{
    InMemoryMembershipDirectory, InMemoryProjectOverrideStore, InMemoryRoleTemplateStore,
    InMemoryUserOverrideStore, MembershipLookup, PermissionResolver, PostgresPermissionStore,
    ProjectOverrideStore, RoleTemplateStore, UserOverrideStore,
};

use crate::config::{ApiConfig, StoreBackend};

pub type DynResolver = PermissionResolver<
    Arc<dyn RoleTemplateStore>,
    Arc<dyn ProjectOverrideStore>,
    Arc<dyn UserOverrideStore>,
    Arc<dyn MembershipLookup>,
>;

pub struct AppServices {
    pub resolver: DynResolver,
    pub backend: &'static str,
}

impl AppServices {
    pub fn templates(&self) -> &Arc<dyn RoleTemplateStore> {
        self.resolver.templates()
    }

    pub fn project_overrides(&self) -> &Arc<dyn ProjectOverrideStore> {
        self.resolver.project_overrides()
    }

    pub fn user_overrides(&self) -> &Arc<dyn UserOverrideStore> {
        self.resolver.user_overrides()
    }

    /// In-memory stores with the given membership directory.
    pub fn in_memory(memberships: InMemoryMembershipDirectory) -> Self {
        let templates: Arc<dyn RoleTemplateStore> = Arc::new(InMemoryRoleTemplateStore::new());
        let project_overrides: Arc<dyn ProjectOverrideStore> =
            Arc::new(InMemoryProjectOverrideStore::new());
        let user_overrides: Arc<dyn UserOverrideStore> = Arc::new(InMemoryUserOverrideStore::new());
        let memberships: Arc<dyn MembershipLookup> = Arc::new(memberships);
        Self {
            resolver: PermissionResolver::new(templates, project_overrides, user_overrides, memberships),
            backend: "in_memory",
        }
    }

    /// One Postgres store backs all three grids and the membership lookup.
    pub fn postgres(store: PostgresPermissionStore) -> Self {
        let store = Arc::new(store);
        let templates: Arc<dyn RoleTemplateStore> = store.clone();
        let project_overrides: Arc<dyn ProjectOverrideStore> = store.clone();
        let user_overrides: Arc<dyn UserOverrideStore> = store.clone();
        let memberships: Arc<dyn MembershipLookup> = store;
        Self {
            resolver: PermissionResolver::new(templates, project_overrides, user_overrides, memberships),
            backend: "postgres",
        }
    }
}

pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    match &config.store {
        StoreBackend::InMemory => {
            let memberships = match &config.memberships_file {
                Some(path) => InMemoryMembershipDirectory::load_json_file(path)?,
                None => InMemoryMembershipDirectory::new(),
            };
            tracing::info!("using in-memory permission stores");
            Ok(AppServices::in_memory(memberships))
        }
        StoreBackend::Postgres { database_url } => {
            if config.memberships_file.is_some() {
                tracing::warn!("SITEGATE_MEMBERSHIPS_FILE ignored; memberships are read from Postgres");
            }
            let store = PostgresPermissionStore::connect(database_url)
                .await
                .context("failed to connect to Postgres")?;
            store
                .migrate()
                .await
                .context("failed to apply permission grid migrations")?;
            tracing::info!("using Postgres permission stores");
            Ok(AppServices::postgres(store))
        }
    }
}
