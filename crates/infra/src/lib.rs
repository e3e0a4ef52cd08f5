//! Infrastructure layer: permission grid stores, membership lookup, resolver.

pub mod membership;
pub mod resolver;
pub mod store;

pub use membership::{InMemoryMembershipDirectory, MembershipLookup, ProjectMembership};
pub use resolver::{LayerSnapshot, PermissionResolver, ResolveError};
pub use store::{
    InMemoryProjectOverrideStore, InMemoryRoleTemplateStore, InMemoryUserOverrideStore,
    PostgresPermissionStore, ProjectOverride, ProjectOverrideStore, RoleTemplate,
    RoleTemplateStore, StoreError, UserOverride, UserOverrideStore,
};

#[cfg(test)]
mod integration_tests;
