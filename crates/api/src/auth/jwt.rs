//! JWT access tokens (HS256)

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::middleware::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and validates access tokens with a secret supplied at construction
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::hours(expiry_hours),
        }
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: &str,
    ) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + self.expiry).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {}", e)))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let manager = JwtManager::new("test-secret", 24);
        let user_id = Uuid::new_v4();

        let token = manager
            .generate_access_token(user_id, "amina@example.test", "vendor")
            .unwrap();
        let claims = manager.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "amina@example.test");
        assert_eq!(claims.role, "vendor");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let issuer = JwtManager::new("secret-a", 24);
        let verifier = JwtManager::new("secret-b", 24);
        let token = issuer
            .generate_access_token(Uuid::new_v4(), "a@example.test", "admin")
            .unwrap();

        assert!(matches!(
            verifier.validate_access_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // Far enough in the past to clear the default 60s leeway
        let manager = JwtManager::new("test-secret", -1);
        let token = manager
            .generate_access_token(Uuid::new_v4(), "a@example.test", "vendor")
            .unwrap();

        assert!(manager.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret", 24);
        assert!(manager.validate_access_token("not.a.jwt").is_err());
    }
}
