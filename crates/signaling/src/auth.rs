//! 连接认证
//!
//! 握手时携带的 bearer token 是 HS256 签名的 JWT，`sub` 为用户 id。

use crate::error::AuthError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Token 载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub exp: u64,
}

pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT 校验
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret-test-secret-test-secret";

    fn mint(sub: &str, exp_offset: i64, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            username: Some("alice".to_string()),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let claims = auth.verify(&mint("u1", 3600, SECRET)).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username.as_deref(), Some("alice"));
    }

    #[test]
    fn rejects_expired_token() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(matches!(
            auth.verify(&mint("u1", -60, SECRET)),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn rejects_bad_signature_and_garbage() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(matches!(
            auth.verify(&mint("u1", 3600, "another-secret")),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            auth.verify("not.a.jwt"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(auth.verify("  "), Err(AuthError::MissingToken)));
    }

    #[test]
    fn rejects_empty_subject() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(matches!(
            auth.verify(&mint("", 3600, SECRET)),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
