use crate::{
    db::models::{Camera, DeviceRecord},
    error::Error,
    services::DeviceDirectory,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Cameras repository, read-only view of the device directory
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get camera by serial
    pub async fn get_by_serial(&self, serial: &str) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(
            r#"
            SELECT serial, name, enabled, filter_classes, filter_min_age,
                   filter_min_distance, updated_at
            FROM cameras
            WHERE serial = $1
            "#,
        )
        .bind(serial)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by serial: {}", e)))?;

        Ok(result)
    }

    /// Serials of all enabled cameras
    pub async fn get_enabled_serials(&self) -> Result<Vec<String>> {
        let result = sqlx::query_scalar::<_, String>(
            r#"
            SELECT serial
            FROM cameras
            WHERE enabled = TRUE
            ORDER BY serial
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get enabled cameras: {}", e)))?;

        debug!("Loaded {} enabled cameras", result.len());

        Ok(result)
    }
}

#[async_trait]
impl DeviceDirectory for CamerasRepository {
    async fn device(&self, serial: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.get_by_serial(serial).await?.map(DeviceRecord::from))
    }

    async fn enabled_devices(&self) -> Result<BTreeSet<String>> {
        Ok(self.get_enabled_serials().await?.into_iter().collect())
    }
}
