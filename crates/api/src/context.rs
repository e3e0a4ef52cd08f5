use sitegate_auth::{Principal, SessionRole};
use sitegate_core::UserId;

/// Principal context for a request (authenticated identity + session roles).
///
/// Inserted by the auth middleware; present on every route except `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    roles: Vec<SessionRole>,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, roles: Vec<SessionRole>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[SessionRole] {
        &self.roles
    }

    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.user_id,
            roles: self.roles.clone(),
        }
    }
}
