use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sitegate_core::UserId;

use crate::SessionRole;

/// JWT claims model (transport-agnostic).
///
/// This is the minimal set of claims the permission API expects once a token
/// has been decoded/verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Session roles (admin console privileges).
    #[serde(default)]
    pub roles: Vec<SessionRole>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only. Signature verification lives in
/// [`crate::jwt`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued_offset: i64, ttl: i64) -> (JwtClaims, DateTime<Utc>) {
        let now = Utc::now();
        let issued_at = now + Duration::seconds(issued_offset);
        (
            JwtClaims {
                sub: UserId::new(),
                roles: vec![SessionRole::ADMIN],
                issued_at,
                expires_at: issued_at + Duration::seconds(ttl),
            },
            now,
        )
    }

    #[test]
    fn valid_window_passes() {
        let (c, now) = claims(-10, 60);
        assert_eq!(validate_claims(&c, now), Ok(()));
    }

    #[test]
    fn expired_and_future_tokens_fail() {
        let (c, now) = claims(-120, 60);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::Expired));

        let (c, now) = claims(30, 60);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::NotYetValid));

        let (c, now) = claims(-10, 0);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::InvalidTimeWindow));
    }
}
