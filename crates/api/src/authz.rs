//! API-side admin gate for permission edits.
//!
//! Stores and the resolver assume mutations arrive pre-authorized; this is
//! where that assumption is made true, before any store is touched.

use sitegate_auth::{authorize_admin, AuthzError};

use crate::context::PrincipalContext;

/// Require administrative privilege for a mutation in the current request.
pub fn authorize_mutation(
    principal: &PrincipalContext,
    operation: &'static str,
) -> Result<(), AuthzError> {
    let result = authorize_admin(&principal.principal(), operation);
    if result.is_err() {
        tracing::warn!(user_id = %principal.user_id(), operation, "permission edit rejected: not an admin");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegate_auth::SessionRole;
    use sitegate_core::UserId;

    #[test]
    fn only_admins_may_edit() {
        let admin = PrincipalContext::new(UserId::new(), vec![SessionRole::ADMIN]);
        let viewer = PrincipalContext::new(UserId::new(), vec![SessionRole::new("viewer")]);

        assert!(authorize_mutation(&admin, "save role template").is_ok());
        assert_eq!(
            authorize_mutation(&viewer, "save role template"),
            Err(AuthzError::AdminRequired("save role template"))
        );
    }
}
