//! Boundaries to the collaborators that own devices, users, settings and
//! event storage. The streaming core only reads through these traits; the
//! PostgreSQL repositories in `db::repositories` implement them.

use crate::db::models::{DeviceRecord, Identity, PathEvent, VideoSettings};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Device directory lookups
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Look up a single device by serial
    async fn device(&self, serial: &str) -> Result<Option<DeviceRecord>>;

    /// Serials of every enabled device
    async fn enabled_devices(&self) -> Result<BTreeSet<String>>;
}

/// User identity lookups
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn identity(&self, user_id: &Uuid) -> Result<Option<Identity>>;
}

/// System settings lookups
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn video_settings(&self) -> Result<VideoSettings>;
}

/// Durable storage for accepted path events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn store(&self, event: &PathEvent) -> Result<()>;
}
