use crate::config::SecurityConfig;
use crate::error::Error;
use anyhow::Result;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod auth;

pub use auth::{AuthService, HandshakeError};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User name
    #[serde(default)]
    pub name: String,
    /// User role
    #[serde(default)]
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: usize,
}

impl Claims {
    /// Get the user ID from the claims
    pub fn user_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.sub)
    }
}

/// Verifies handshake tokens issued by the account service
pub struct SecurityService {
    config: SecurityConfig,
}

impl SecurityService {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.jwt_leeway_secs;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))?;

        Ok(token_data)
    }

    /// Extract user ID from validated token data
    pub fn get_user_id_from_token(&self, token_data: &TokenData<Claims>) -> Result<Uuid> {
        let user_id = token_data
            .claims
            .user_id()
            .map_err(|e| Error::Authentication(format!("Invalid user ID in token: {}", e)))?;

        Ok(user_id)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{token_for, SECRET};
    use super::*;
    use chrono::Duration;

    fn service() -> SecurityService {
        SecurityService::new(SecurityConfig {
            jwt_secret: SECRET.to_string(),
            jwt_leeway_secs: 0,
        })
    }

    #[test]
    fn accepts_valid_token() {
        let user = Uuid::new_v4();
        let token = token_for(&user.to_string(), Duration::minutes(5), SECRET);

        let data = service().validate_token(&token).unwrap();
        assert_eq!(service().get_user_id_from_token(&data).unwrap(), user);
    }

    #[test]
    fn rejects_bad_tokens() {
        let user = Uuid::new_v4().to_string();

        let expired = token_for(&user, Duration::minutes(-5), SECRET);
        assert!(service().validate_token(&expired).is_err());

        let forged = token_for(&user, Duration::minutes(5), "other-secret");
        assert!(service().validate_token(&forged).is_err());

        assert!(service().validate_token("not.a.jwt").is_err());
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let token = token_for("admin", Duration::minutes(5), SECRET);
        let data = service().validate_token(&token).unwrap();
        assert!(service().get_user_id_from_token(&data).is_err());
    }
}
