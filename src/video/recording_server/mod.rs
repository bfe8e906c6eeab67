//! Clients for the third-party recording servers clips are exported from.

pub mod acs;
pub mod http;

use crate::config::{RecordingServerConfig, RecordingServerKind};
use crate::video::TimeWindow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Response header some servers use to report the clip length in seconds
pub const CLIP_DURATION_HEADER: &str = "x-clip-duration";

/// Backend-neutral failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NotFound,
    ServerError,
    Unreachable,
    Timeout,
    InvalidRequest,
    AuthenticationFailed,
}

impl FetchErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            FetchErrorKind::NotFound => "No recording found for the requested time range",
            FetchErrorKind::ServerError => "Recording server error",
            FetchErrorKind::Unreachable => "Recording server unreachable",
            FetchErrorKind::Timeout => "Recording server timed out",
            FetchErrorKind::InvalidRequest => "Recording server rejected the request",
            FetchErrorKind::AuthenticationFailed => "Recording server authentication failed",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an unsuccessful HTTP status
    pub fn from_status(status: StatusCode) -> Self {
        let kind = match status {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => FetchErrorKind::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchErrorKind::AuthenticationFailed,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => FetchErrorKind::InvalidRequest,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchErrorKind::Timeout,
            _ => FetchErrorKind::ServerError,
        };
        Self::new(kind, format!("HTTP {}", status))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if err.is_connect() {
            FetchErrorKind::Unreachable
        } else if let Some(status) = err.status() {
            return Self::from_status(status);
        } else {
            FetchErrorKind::ServerError
        };
        Self::new(kind, err.to_string())
    }
}

/// An exported clip as a byte stream
pub struct FetchedClip {
    /// Seconds, as reported by the server or derived from the window
    pub duration: f64,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl fmt::Debug for FetchedClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedClip")
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RecordingServer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue a single export request for `serial` over `window`
    async fn fetch(&self, serial: &str, window: &TimeWindow) -> Result<FetchedClip, FetchError>;
}

/// Build the adapter selected in configuration
pub fn build(config: &RecordingServerConfig) -> Result<Arc<dyn RecordingServer>> {
    let client = http_client(config)?;

    let server: Arc<dyn RecordingServer> = match config.kind {
        RecordingServerKind::Acs => Arc::new(acs::AcsRecordingServer::new(config, client)?),
        RecordingServerKind::Http => Arc::new(http::HttpRecordingServer::new(config, client)?),
    };

    log::info!(
        "Using {} recording server at {}",
        server.name(),
        config.base_url
    );

    Ok(server)
}

fn http_client(config: &RecordingServerConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .context("Failed to build recording server HTTP client")
}

/// Turn a response into a clip, mapping error statuses
pub(crate) fn into_clip(response: Response, window: &TimeWindow) -> Result<FetchedClip, FetchError> {
    let status = response.status();
    if !status.is_success() || status == StatusCode::NO_CONTENT {
        return Err(FetchError::from_status(status));
    }

    let duration = response
        .headers()
        .get(CLIP_DURATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or_else(|| window.duration_secs());

    Ok(FetchedClip {
        duration,
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from))
            .boxed(),
    })
}
