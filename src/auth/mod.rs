// ============================================================================
// Authorization Gate
// ============================================================================
//
// Verifies bearer tokens and exposes the caller's identity and role.
// Verification is local and stateless (shared HMAC secret); there is no
// round trip to the identity service, so revocation before expiry is not
// possible.
//
// ============================================================================

mod jwt;

pub use jwt::{JwtAuthGate, MIN_SECRET_LEN};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Access,
    Refresh,
}

/// Identity derived from a verified token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: String,
    pub role: Role,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
}

impl AuthClaims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Opaque rejection. Bad signature, expiry, malformed input and unknown
/// roles all map here so callers cannot probe which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid or expired token")]
pub struct AuthError;

#[derive(Debug, thiserror::Error)]
pub enum AuthSetupError {
    #[error("auth secret must be at least {0} bytes")]
    SecretTooShort(usize),

    #[error("failed to sign token: {0}")]
    Encoding(String),
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<AuthClaims, AuthError>;
}

/// Admins satisfy every role; users satisfy only `Role::User`.
pub fn require_role(claims: &AuthClaims, role: Role) -> bool {
    match role {
        Role::User => true,
        Role::Admin => claims.role == Role::Admin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role) -> AuthClaims {
        AuthClaims {
            user_id: "u1".to_string(),
            role,
            token_type: TokenType::Access,
            expires_at: Utc::now(),
            not_before: None,
        }
    }

    #[test]
    fn test_require_role() {
        assert!(require_role(&claims(Role::User), Role::User));
        assert!(!require_role(&claims(Role::User), Role::Admin));
        assert!(require_role(&claims(Role::Admin), Role::Admin));
        assert!(require_role(&claims(Role::Admin), Role::User));
    }

    #[test]
    fn test_auth_error_is_opaque() {
        assert_eq!(AuthError.to_string(), "invalid or expired token");
    }
}
