//! Session principal and the admin gate for permission edits.
//!
//! Authentication itself happens upstream; by the time a request reaches the
//! permission API its bearer token has been validated into a [`Principal`].

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sitegate_core::UserId;

/// Session-level role carried in the bearer token (e.g. `"admin"`).
///
/// Distinct from [`crate::RoleKey`]: a session role describes what the caller
/// may do in the admin console, not what they may do inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRole(Cow<'static, str>);

impl SessionRole {
    pub const ADMIN: SessionRole = SessionRole(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == "admin"
    }
}

impl core::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<SessionRole>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(SessionRole::is_admin)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: administrative privilege required to {0}")]
    AdminRequired(&'static str),
}

/// Require administrative privilege for a mutation.
///
/// `operation` names the edit for the error message (e.g. "save role template").
pub fn authorize_admin(principal: &Principal, operation: &'static str) -> Result<(), AuthzError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(AuthzError::AdminRequired(operation))
    }
}
