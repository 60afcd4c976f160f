use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthClaims, AuthError, AuthSetupError, Authenticator, Role, TokenType};

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Claims as they appear inside the signed token. The identity service
/// only sets `user_id`; `sub` is accepted as a fallback subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub token_type: TokenType,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: i64,
}

impl TokenClaims {
    /// `user_id`, else `sub`. Both set and different is ambiguous.
    fn subject(&self) -> Option<&str> {
        let user_id = Some(self.user_id.as_str()).filter(|id| !id.is_empty());
        let sub = self.sub.as_deref().filter(|id| !id.is_empty());
        match (user_id, sub) {
            (Some(user_id), Some(sub)) if user_id != sub => None,
            (Some(id), _) | (None, Some(id)) => Some(id),
            (None, None) => None,
        }
    }
}

/// Stateless HS256 token verifier.
///
/// Tokens are checked locally against the shared secret only, so a token
/// stays valid until `exp` even if the user is disabled upstream. Keep token
/// lifetimes short where that matters.
#[derive(Clone)]
pub struct JwtAuthGate {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtAuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthGate")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtAuthGate {
    pub fn new(secret: &str, leeway_secs: u64) -> Result<Self, AuthSetupError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthSetupError::SecretTooShort(MIN_SECRET_LEN));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Issue an access token for `user_id`, valid for `ttl` from now.
    pub fn issue_token(&self, user_id: &str, role: Role, ttl: Duration) -> Result<String, AuthSetupError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: Some(user_id.to_string()),
            user_id: user_id.to_string(),
            role,
            token_type: TokenType::Access,
            exp: (now + ttl).timestamp(),
            nbf: None,
            iat: now.timestamp(),
        };
        self.encode_claims(&claims)
    }

    pub(crate) fn encode_claims<T: Serialize>(&self, claims: &T) -> Result<String, AuthSetupError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthSetupError::Encoding(e.to_string()))
    }
}

impl Authenticator for JwtAuthGate {
    fn authenticate(&self, token: &str) -> Result<AuthClaims, AuthError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            // The cause stays in the logs; callers only ever see AuthError.
            tracing::debug!(reason = ?e.kind(), "Token rejected");
            AuthError
        })?;
        let claims = data.claims;

        if claims.token_type != TokenType::Access {
            tracing::debug!(token_type = ?claims.token_type, "Token rejected: not an access token");
            return Err(AuthError);
        }
        let Some(user_id) = claims.subject().map(str::to_string) else {
            tracing::debug!("Token rejected: missing or conflicting subject");
            return Err(AuthError);
        };

        let expires_at = timestamp(claims.exp).ok_or(AuthError)?;
        let not_before = match claims.nbf {
            Some(nbf) => Some(timestamp(nbf).ok_or(AuthError)?),
            None => None,
        };

        Ok(AuthClaims {
            user_id,
            role: claims.role,
            token_type: claims.token_type,
            expires_at,
            not_before,
        })
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "bicycle-store-secret-key-for-tests-only";
    const OTHER_SECRET: &str = "a-completely-different-secret-key-value";

    fn gate() -> JwtAuthGate {
        JwtAuthGate::new(SECRET, 0).unwrap()
    }

    #[test]
    fn test_issued_token_authenticates() {
        let gate = gate();
        let token = gate.issue_token("u1", Role::User, Duration::minutes(5)).unwrap();

        let claims = gate.authenticate(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.expires_at > Utc::now());
    }

    #[test]
    fn test_bearer_prefix_is_accepted() {
        let gate = gate();
        let token = gate.issue_token("u1", Role::Admin, Duration::minutes(5)).unwrap();

        assert!(gate.authenticate(&format!("Bearer {token}")).is_ok());
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let foreign = JwtAuthGate::new(OTHER_SECRET, 0).unwrap();

        for role in [Role::User, Role::Admin] {
            let token = foreign.issue_token("u1", role, Duration::hours(1)).unwrap();
            assert_eq!(gate().authenticate(&token), Err(AuthError));
        }
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let gate = gate();
        let token = gate.issue_token("u1", Role::User, Duration::minutes(-5)).unwrap();

        assert_eq!(gate.authenticate(&token), Err(AuthError));
    }

    #[test]
    fn test_not_yet_valid_token_is_rejected() {
        let gate = gate();
        let now = Utc::now().timestamp();
        let token = gate
            .encode_claims(&TokenClaims {
                sub: Some("u1".to_string()),
                user_id: "u1".to_string(),
                role: Role::User,
                token_type: TokenType::Access,
                exp: now + 3600,
                nbf: Some(now + 600),
                iat: now,
            })
            .unwrap();

        assert_eq!(gate.authenticate(&token), Err(AuthError));
    }

    #[test]
    fn test_identity_service_claim_shape_is_accepted() {
        let gate = gate();
        let now = Utc::now().timestamp();
        let token = gate
            .encode_claims(&json!({
                "user_id": "u1",
                "role": "admin",
                "exp": now + 3600,
                "iat": now,
                "nbf": now,
            }))
            .unwrap();

        let claims = gate.authenticate(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.not_before.is_some());
    }

    #[test]
    fn test_subject_falls_back_to_sub() {
        let gate = gate();
        let now = Utc::now().timestamp();
        let token = gate
            .encode_claims(&json!({"sub": "u7", "role": "user", "exp": now + 3600}))
            .unwrap();

        assert_eq!(gate.authenticate(&token).unwrap().user_id, "u7");
    }

    #[test]
    fn test_missing_or_conflicting_subject_is_rejected() {
        let gate = gate();
        let now = Utc::now().timestamp();

        let anonymous = gate
            .encode_claims(&json!({"user_id": "", "role": "user", "exp": now + 3600}))
            .unwrap();
        assert_eq!(gate.authenticate(&anonymous), Err(AuthError));

        let conflicting = gate
            .encode_claims(&json!({"user_id": "u1", "sub": "u2", "role": "user", "exp": now + 3600}))
            .unwrap();
        assert_eq!(gate.authenticate(&conflicting), Err(AuthError));
    }

    #[test]
    fn test_token_without_expiry_is_rejected() {
        let gate = gate();
        let token = gate.encode_claims(&json!({"user_id": "u1", "role": "user"})).unwrap();

        assert_eq!(gate.authenticate(&token), Err(AuthError));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let gate = gate();
        let now = Utc::now().timestamp();
        let token = gate
            .encode_claims(&json!({
                "sub": "u1",
                "user_id": "u1",
                "role": "superuser",
                "exp": now + 3600,
                "iat": now,
            }))
            .unwrap();

        assert_eq!(gate.authenticate(&token), Err(AuthError));
    }

    #[test]
    fn test_refresh_token_is_rejected() {
        let gate = gate();
        let now = Utc::now().timestamp();
        let token = gate
            .encode_claims(&json!({
                "sub": "u1",
                "user_id": "u1",
                "role": "user",
                "token_type": "refresh",
                "exp": now + 3600,
                "iat": now,
            }))
            .unwrap();

        assert_eq!(gate.authenticate(&token), Err(AuthError));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(gate().authenticate("not-a-token"), Err(AuthError));
        assert_eq!(gate().authenticate(""), Err(AuthError));
    }

    #[test]
    fn test_short_secret_is_refused() {
        assert!(matches!(
            JwtAuthGate::new("short", 0),
            Err(AuthSetupError::SecretTooShort(MIN_SECRET_LEN))
        ));
    }
}
