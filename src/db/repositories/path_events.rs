use crate::{db::models::PathEvent, error::Error, services::EventStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Path events repository
#[derive(Clone)]
pub struct PathEventsRepository {
    pool: Arc<PgPool>,
}

impl PathEventsRepository {
    /// Create a new path events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert an accepted path event
    pub async fn create(&self, event: &PathEvent) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO path_events (
                id, serial, class, track_id, birth, observed_at, dx, dy, speed,
                age, dwell, path, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(&event.serial)
        .bind(&event.class)
        .bind(&event.id)
        .bind(epoch_to_datetime(event.birth))
        .bind(epoch_to_datetime(event.timestamp))
        .bind(event.dx)
        .bind(event.dy)
        .bind(event.speed)
        .bind(event.age)
        .bind(event.dwell)
        .bind(Json(&event.path))
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create path event: {}", e)))?;

        debug!("Stored path event {} for {}", id, event.serial);

        Ok(id)
    }
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[async_trait]
impl EventStore for PathEventsRepository {
    async fn store(&self, event: &PathEvent) -> Result<()> {
        self.create(event).await.map(|_| ())
    }
}
