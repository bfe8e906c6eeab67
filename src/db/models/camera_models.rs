use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Camera row as stored by the device-management service
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub serial: String,
    pub name: String,
    pub enabled: bool,
    /// `NULL` means the class filter was never configured
    pub filter_classes: Option<Vec<String>>,
    pub filter_min_age: f64,
    pub filter_min_distance: f64,
    pub updated_at: DateTime<Utc>,
}

/// Allowed object classes for ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassFilter {
    /// Nothing configured; the default class list applies
    NotConfigured,
    /// Explicit list; an empty list admits nothing
    Allowed(Vec<String>),
}

impl From<Option<Vec<String>>> for ClassFilter {
    fn from(value: Option<Vec<String>>) -> Self {
        match value {
            Some(classes) => ClassFilter::Allowed(classes),
            None => ClassFilter::NotConfigured,
        }
    }
}

/// Per-device acceptance thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub classes: ClassFilter,
    /// Minimum tracked age in seconds
    pub min_age: f64,
    /// Minimum displacement as a percentage of the coordinate diagonal
    pub min_distance: f64,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            classes: ClassFilter::NotConfigured,
            min_age: 0.0,
            min_distance: 0.0,
        }
    }
}

/// Device as seen by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub name: String,
    pub enabled: bool,
    pub filter: DeviceFilter,
}

impl From<Camera> for DeviceRecord {
    fn from(camera: Camera) -> Self {
        DeviceRecord {
            serial: camera.serial,
            name: camera.name,
            enabled: camera.enabled,
            filter: DeviceFilter {
                classes: camera.filter_classes.into(),
                min_age: camera.filter_min_age,
                min_distance: camera.filter_min_distance,
            },
        }
    }
}
