use serde::{Deserialize, Serialize};

/// One trajectory sample in the 0-1000 normalized coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSample {
    pub x: f64,
    pub y: f64,
    /// Local dwell at this sample, in seconds
    pub d: f64,
}

/// Path event model
///
/// Field names match the device payload so an event leaves the service
/// exactly as it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEvent {
    /// Device serial, taken from the transport address
    #[serde(default)]
    pub serial: String,
    /// Object class (Human, Car, ...)
    pub class: String,
    /// Tracking identifier assigned by the device
    pub id: String,
    /// Time the object entered the scene (epoch seconds)
    pub birth: f64,
    /// Time of this observation (epoch seconds)
    pub timestamp: f64,
    /// Horizontal displacement over the object's lifetime
    pub dx: f64,
    /// Vertical displacement over the object's lifetime
    pub dy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Seconds the object has been tracked
    pub age: f64,
    /// Longest dwell anywhere along the path, in seconds
    #[serde(default)]
    pub dwell: f64,
    #[serde(default)]
    pub path: Vec<PathSample>,
}

impl PathEvent {
    /// Raw displacement length in normalized units
    pub fn displacement(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}
