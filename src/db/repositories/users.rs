use crate::{
    db::models::{Identity, User},
    error::Error,
    services::IdentityStore,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Users repository for identity lookups
#[derive(Clone)]
pub struct UsersRepository {
    pool: Arc<PgPool>,
}

impl UsersRepository {
    /// Create a new users repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, role, active, authorized_cameras, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by ID: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl IdentityStore for UsersRepository {
    async fn identity(&self, user_id: &Uuid) -> Result<Option<Identity>> {
        Ok(self.get_by_id(user_id).await?.map(Identity::from))
    }
}
