use crate::{
    db::models::{settings_models::VIDEO_SETTINGS_KEY, VideoSettings},
    error::Error,
    services::SettingsStore,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

/// Key/value system settings repository
#[derive(Clone)]
pub struct SettingsRepository {
    pool: Arc<PgPool>,
}

impl SettingsRepository {
    /// Create a new settings repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Raw JSON value stored under `key`
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let result = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT value
            FROM system_settings
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get setting {}: {}", key, e)))?;

        Ok(result)
    }
}

#[async_trait]
impl SettingsStore for SettingsRepository {
    async fn video_settings(&self) -> Result<VideoSettings> {
        match self.get(VIDEO_SETTINGS_KEY).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    warn!("Ignoring malformed video settings: {}", e);
                    Ok(VideoSettings::default())
                }
            },
            None => Ok(VideoSettings::default()),
        }
    }
}
