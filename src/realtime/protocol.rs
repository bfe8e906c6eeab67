//! JSON messages exchanged on the event subscription endpoint

use crate::db::models::PathEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-side narrowing applied on top of the device set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFilter {
    /// Allowed classes; absent or empty admits every class
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub min_age: f64,
    /// Minimum raw displacement in normalized units
    #[serde(default)]
    pub min_distance: f64,
    #[serde(default)]
    pub min_dwell: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        cameras: Vec<String>,
        #[serde(default)]
        filters: ClientFilter,
    },
    Unsubscribe {
        #[serde(default)]
        cameras: Vec<String>,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    InvalidJson,
    InvalidMessage,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    Subscribed {
        cameras: Vec<String>,
    },
    Unsubscribed {
        cameras: Vec<String>,
    },
    Pong,
    Path {
        data: PathEvent,
    },
    Error {
        error: String,
        code: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        cameras: Option<Vec<String>>,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, error: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: error.into(),
            code,
            cameras: None,
        }
    }
}

/// Parse a text frame, telling unparseable JSON apart from an unknown shape
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ServerMessage> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ServerMessage::error(ErrorCode::InvalidJson, format!("Invalid JSON: {}", e)))?;

    serde_json::from_value(value).map_err(|e| {
        ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid message: {}", e))
    })
}
