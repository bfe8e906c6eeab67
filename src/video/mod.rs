//! On-demand clip retrieval: fetch a time window from the recording server,
//! fragment it with an external process and stream it back as binary frames.

pub mod probe;
pub mod protocol;
pub mod recording_server;
pub mod session;
pub mod streamer;
pub mod transcode;

pub use protocol::{VideoClientMessage, VideoErrorCode, VideoMetadata, VideoRequest, VideoServerMessage};
pub use recording_server::{FetchError, FetchErrorKind, FetchedClip, RecordingServer};
pub use session::{SessionState, VideoSessionManager};
pub use transcode::{TranscodeError, TranscodePipeline, Transcoder};

use crate::config::VideoConfig;
use crate::realtime::SubscriptionAuthorizer;
use crate::services::SettingsStore;
use chrono::{DateTime, Duration, Utc};
use probe::MediaProbe;
use std::sync::Arc;
use thiserror::Error;

/// Absolute clip window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_milliseconds((value * 1000.0).round() as i64)
}

impl TimeWindow {
    /// `start = target - (age + pre)`, `end = target + post`.
    /// `None` when either bound falls outside the representable range.
    pub fn around(target: DateTime<Utc>, pre: f64, post: f64, age: f64) -> Option<Self> {
        Some(Self {
            start: target.checked_sub_signed(seconds(age + pre)?)?,
            end: target.checked_add_signed(seconds(post)?)?,
        })
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Why a video session ended without completing
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("video playback is disabled")]
    PlaybackDisabled,

    #[error("camera {0} not found")]
    CameraNotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("recording server returned an empty clip")]
    EmptyClip,

    #[error("clip exceeds the {limit} byte limit")]
    ClipTooLarge { limit: usize },

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("request timed out")]
    TimedOut { streaming: bool },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VideoError {
    pub fn code(&self) -> VideoErrorCode {
        match self {
            VideoError::InvalidRequest(_) => VideoErrorCode::InvalidRequest,
            VideoError::PlaybackDisabled => VideoErrorCode::PlaybackDisabled,
            VideoError::CameraNotFound(_) => VideoErrorCode::CameraNotFound,
            VideoError::Fetch(e) => match e.kind {
                FetchErrorKind::NotFound => VideoErrorCode::VideoNotFound,
                FetchErrorKind::InvalidRequest => VideoErrorCode::InvalidRequest,
                FetchErrorKind::ServerError
                | FetchErrorKind::Unreachable
                | FetchErrorKind::Timeout
                | FetchErrorKind::AuthenticationFailed => VideoErrorCode::RecordingServerError,
            },
            VideoError::EmptyClip => VideoErrorCode::VideoNotFound,
            VideoError::ClipTooLarge { .. } | VideoError::Transcode(_) => VideoErrorCode::StreamError,
            VideoError::TimedOut { streaming: false } => VideoErrorCode::RecordingServerError,
            VideoError::TimedOut { streaming: true } => VideoErrorCode::StreamError,
            VideoError::Internal(_) => VideoErrorCode::UnknownError,
        }
    }

    /// Text sent to the client; internal details stay in the log
    pub fn client_message(&self) -> String {
        match self {
            VideoError::Internal(_) => "An unexpected error occurred".to_string(),
            VideoError::Fetch(e) => e.kind.description().to_string(),
            VideoError::Transcode(_) => "Failed to process video".to_string(),
            other => other.to_string(),
        }
    }
}

/// Collaborators shared by every video session
pub struct VideoContext {
    pub config: VideoConfig,
    pub recording_server: Arc<dyn RecordingServer>,
    pub pipeline: TranscodePipeline,
    pub probe: Arc<dyn MediaProbe>,
    pub settings: Arc<dyn SettingsStore>,
    pub authorizer: SubscriptionAuthorizer,
}

#[cfg(test)]
pub mod testing {
    //! Scripted collaborators for session tests

    use super::probe::{MediaInfo, ProbeError};
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::path::Path;
    use std::sync::Mutex;

    /// What the scripted recording server does on each call
    #[derive(Clone)]
    pub enum Script {
        Clip(Vec<Bytes>),
        Fail(FetchErrorKind),
        Hang,
    }

    pub struct ScriptedServer {
        scripts: Mutex<Vec<Script>>,
        pub calls: Mutex<Vec<(String, TimeWindow)>>,
    }

    impl ScriptedServer {
        /// Scripts are consumed in order; the last one repeats
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordingServer for ScriptedServer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, serial: &str, window: &TimeWindow) -> Result<FetchedClip, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((serial.to_string(), *window));

            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.len() > 1 {
                    scripts.remove(0)
                } else {
                    scripts[0].clone()
                }
            };

            match script {
                Script::Clip(chunks) => Ok(FetchedClip {
                    duration: window.duration_secs(),
                    body: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
                }),
                Script::Fail(kind) => Err(FetchError::new(kind, "scripted failure")),
                Script::Hang => futures::future::pending().await,
            }
        }
    }

    pub struct StaticProbe(pub Option<MediaInfo>);

    #[async_trait]
    impl MediaProbe for StaticProbe {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
            self.0
                .clone()
                .ok_or_else(|| ProbeError::Output("no probe data".to_string()))
        }
    }
}
