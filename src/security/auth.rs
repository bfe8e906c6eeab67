use crate::config::SecurityConfig;
use crate::db::models::Identity;
use crate::security::SecurityService;
use crate::services::IdentityStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// WebSocket close code for a missing, invalid or expired credential
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// WebSocket close code for a disabled account
pub const CLOSE_FORBIDDEN: u16 = 4003;
/// WebSocket close code for a server-side failure
pub const CLOSE_INTERNAL: u16 = 1011;

/// Why a connection was refused during the handshake
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken(#[source] anyhow::Error),

    #[error("unknown user")]
    UnknownUser,

    #[error("account disabled")]
    Disabled,

    #[error("identity lookup failed")]
    Internal(#[source] anyhow::Error),
}

impl HandshakeError {
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::MissingToken
            | HandshakeError::InvalidToken(_)
            | HandshakeError::UnknownUser => CLOSE_UNAUTHORIZED,
            HandshakeError::Disabled => CLOSE_FORBIDDEN,
            HandshakeError::Internal(_) => CLOSE_INTERNAL,
        }
    }

    /// Close frame reason; never carries internal detail
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::MissingToken => "Authentication required",
            HandshakeError::InvalidToken(_) => "Invalid or expired token",
            HandshakeError::UnknownUser => "Unknown user",
            HandshakeError::Disabled => "Account disabled",
            HandshakeError::Internal(_) => "Internal error",
        }
    }
}

/// Authenticates WebSocket handshakes
pub struct AuthService {
    security: SecurityService,
    identities: Arc<dyn IdentityStore>,
}

impl AuthService {
    pub fn new(config: &SecurityConfig, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            security: SecurityService::new(config.clone()),
            identities,
        }
    }

    /// Resolve the identity behind a handshake token
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, HandshakeError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::MissingToken)?;

        let token_data = self
            .security
            .validate_token(token)
            .map_err(HandshakeError::InvalidToken)?;
        let user_id = self
            .security
            .get_user_id_from_token(&token_data)
            .map_err(HandshakeError::InvalidToken)?;

        let identity = match self.identities.identity(&user_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("Handshake for unknown user {}", user_id);
                return Err(HandshakeError::UnknownUser);
            }
            Err(e) => {
                error!("Identity lookup for {} failed: {:#}", user_id, e);
                return Err(HandshakeError::Internal(e));
            }
        };

        if !identity.active {
            info!("Rejected handshake for disabled user {}", identity.username);
            return Err(HandshakeError::Disabled);
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::testing::{token_for, SECRET};
    use crate::services::testing::{standard, InMemoryIdentities};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    fn config() -> SecurityConfig {
        SecurityConfig {
            jwt_secret: SECRET.to_string(),
            jwt_leeway_secs: 0,
        }
    }

    #[tokio::test]
    async fn resolves_active_identity() {
        let identities = Arc::new(InMemoryIdentities::default());
        let identity = standard(&["ACCC8E000001"]);
        identities.insert(identity.clone());
        let auth = AuthService::new(&config(), identities);

        let token = token_for(&identity.user_id.to_string(), Duration::minutes(5), SECRET);
        assert_eq!(auth.authenticate(Some(&token)).await.unwrap(), identity);
    }

    #[tokio::test]
    async fn close_codes() {
        let identities = Arc::new(InMemoryIdentities::default());
        let mut disabled = standard(&[]);
        disabled.active = false;
        identities.insert(disabled.clone());
        let auth = AuthService::new(&config(), identities);

        let code = |r: Result<Identity, HandshakeError>| r.unwrap_err().close_code();

        assert_eq!(code(auth.authenticate(None).await), 4001);
        assert_eq!(code(auth.authenticate(Some("  ")).await), 4001);
        assert_eq!(code(auth.authenticate(Some("garbage")).await), 4001);

        let expired = token_for(&disabled.user_id.to_string(), Duration::minutes(-5), SECRET);
        assert_eq!(code(auth.authenticate(Some(&expired)).await), 4001);

        let stranger = token_for(&Uuid::new_v4().to_string(), Duration::minutes(5), SECRET);
        assert_eq!(code(auth.authenticate(Some(&stranger)).await), 4001);

        let token = token_for(&disabled.user_id.to_string(), Duration::minutes(5), SECRET);
        assert_eq!(code(auth.authenticate(Some(&token)).await), 4003);
    }

    struct BrokenStore;

    #[async_trait]
    impl IdentityStore for BrokenStore {
        async fn identity(&self, _user_id: &Uuid) -> Result<Option<Identity>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_internal() {
        let auth = AuthService::new(&config(), Arc::new(BrokenStore));
        let token = token_for(&Uuid::new_v4().to_string(), Duration::minutes(5), SECRET);

        let err = auth.authenticate(Some(&token)).await.unwrap_err();
        assert_eq!(err.close_code(), 1011);
        assert_eq!(err.reason(), "Internal error");
    }
}
