//! JSON messages exchanged on the video endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target timestamp as sent by clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Epoch milliseconds
    Millis(f64),
    /// RFC 3339, or epoch milliseconds as a string
    Text(String),
}

impl Timestamp {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) if ms.is_finite() => {
                DateTime::<Utc>::from_timestamp_millis(ms.round() as i64)
            }
            Timestamp::Millis(_) => None,
            Timestamp::Text(text) => match text.trim().parse::<i64>() {
                Ok(ms) => DateTime::<Utc>::from_timestamp_millis(ms),
                Err(_) => DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
            },
        }
    }
}

/// Body of `request_video`. Everything is optional at the wire level so
/// missing fields surface as `INVALID_REQUEST` rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub pre_time: Option<f64>,
    #[serde(default)]
    pub post_time: Option<f64>,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoClientMessage {
    RequestVideo(VideoRequest),
    CloseVideo,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoErrorCode {
    VideoNotFound,
    RecordingServerError,
    CameraNotFound,
    PlaybackDisabled,
    InvalidRequest,
    StreamError,
    UnknownError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// MIME string including the codec profile, for MediaSource
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoServerMessage {
    VideoMetadata(VideoMetadata),
    VideoComplete,
    Pong,
    Error { error: String, code: VideoErrorCode },
}

pub fn parse_video_message(text: &str) -> Result<VideoClientMessage, VideoServerMessage> {
    serde_json::from_str(text).map_err(|e| VideoServerMessage::Error {
        error: format!("Invalid message: {}", e),
        code: VideoErrorCode::InvalidRequest,
    })
}
