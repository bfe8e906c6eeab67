//! Per-connection video session state machine.
//!
//! `Idle -> Requesting -> Streaming -> {Completed | Errored | Cancelled}`.
//! At most one session runs per connection; a new request cancels and joins
//! the previous one before anything else happens.

use crate::db::models::Identity;
use crate::realtime::Outbound;
use crate::video::probe::{mime_type, MediaInfo};
use crate::video::protocol::{
    parse_video_message, VideoClientMessage, VideoMetadata, VideoRequest, VideoServerMessage,
};
use crate::video::streamer::{ChunkStreamer, StreamEnd};
use crate::video::{TimeWindow, VideoContext, VideoError};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SUPPORTED_FORMATS: &[&str] = &["mp4", "fmp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Requesting | SessionState::Streaming)
    }
}

/// A validated request ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub serial: String,
    pub window: TimeWindow,
    pub playback_enabled: bool,
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the video session of one connection
pub struct VideoSessionManager {
    context: Arc<VideoContext>,
    identity: Identity,
    outbound: mpsc::Sender<Outbound>,
    state: Arc<watch::Sender<SessionState>>,
    active: Option<ActiveSession>,
}

impl VideoSessionManager {
    pub fn new(context: Arc<VideoContext>, identity: Identity, outbound: mpsc::Sender<Outbound>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            context,
            identity,
            outbound,
            state: Arc::new(state),
            active: None,
        }
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Handle one text frame from the video endpoint
    pub async fn handle_text(&mut self, text: &str) {
        match parse_video_message(text) {
            Ok(VideoClientMessage::RequestVideo(request)) => self.request(request).await,
            Ok(VideoClientMessage::CloseVideo) => self.close().await,
            Ok(VideoClientMessage::Ping) => {
                send(&self.outbound, &VideoServerMessage::Pong).await;
            }
            Err(reply) => {
                debug!("Rejected video message: {}", text);
                send(&self.outbound, &reply).await;
            }
        }
    }

    /// Start a new session, tearing down the current one first
    pub async fn request(&mut self, request: VideoRequest) {
        self.teardown().await;

        let params = match self.validate(request).await {
            Ok(params) => params,
            Err(e) => {
                debug!("Invalid video request from {}: {}", self.identity.username, e);
                send(&self.outbound, &error_message(&e)).await;
                return;
            }
        };

        info!(
            "Video request from {} for {} ({} to {})",
            self.identity.username, params.serial, params.window.start, params.window.end
        );

        self.state.send_replace(SessionState::Requesting);

        let cancel = CancellationToken::new();
        let task = SessionTask {
            context: self.context.clone(),
            identity: self.identity.clone(),
            outbound: self.outbound.clone(),
            state: self.state.clone(),
        };
        let handle = tokio::spawn(task.run(params, cancel.clone()));

        self.active = Some(ActiveSession { cancel, handle });
    }

    /// Cancel the current session without emitting anything
    pub async fn close(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                if e.is_panic() {
                    error!("Video session task panicked: {}", e);
                }
            }
        }
        self.state.send_replace(SessionState::Idle);
    }

    async fn validate(&self, request: VideoRequest) -> Result<SessionParams, VideoError> {
        let serial = request
            .serial
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VideoError::InvalidRequest("Missing required field: serial".to_string()))?;

        let target = request
            .timestamp
            .ok_or_else(|| VideoError::InvalidRequest("Missing required field: timestamp".to_string()))?
            .resolve()
            .ok_or_else(|| VideoError::InvalidRequest("Invalid timestamp".to_string()))?;

        if let Some(format) = request.format.as_deref() {
            if !SUPPORTED_FORMATS.contains(&format) {
                return Err(VideoError::InvalidRequest(format!(
                    "Unsupported format: {}",
                    format
                )));
            }
        }

        let config = &self.context.config;
        let settings = match self.context.settings.video_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Video settings unavailable, using configured defaults: {:#}", e);
                Default::default()
            }
        };

        let pre = request
            .pre_time
            .or(settings.default_pre_time)
            .unwrap_or(config.default_pre_time_secs);
        let post = request
            .post_time
            .or(settings.default_post_time)
            .unwrap_or(config.default_post_time_secs);
        let age = request.age.unwrap_or(0.0);

        for (name, value) in [("preTime", pre), ("postTime", post), ("age", age)] {
            if !value.is_finite() || value < 0.0 {
                return Err(VideoError::InvalidRequest(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }

        // Bounded before any date arithmetic
        let length = age + pre + post;
        if length > config.max_window_secs {
            return Err(VideoError::InvalidRequest(format!(
                "Requested window of {:.1}s exceeds the {:.0}s limit",
                length, config.max_window_secs
            )));
        }

        let window = TimeWindow::around(target, pre, post, age)
            .ok_or_else(|| VideoError::InvalidRequest("Timestamp out of range".to_string()))?;
        if window.duration_secs() <= 0.0 {
            return Err(VideoError::InvalidRequest("Empty time window".to_string()));
        }

        Ok(SessionParams {
            serial,
            window,
            playback_enabled: settings.playback_enabled,
        })
    }
}

impl Drop for VideoSessionManager {
    fn drop(&mut self) {
        // The task drops its transcoder (killing it) once it observes this
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

async fn send<M: Serialize>(outbound: &mpsc::Sender<Outbound>, message: &M) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => outbound.send(Outbound::Text(text)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize video message: {}", e);
            false
        }
    }
}

fn error_message(err: &VideoError) -> VideoServerMessage {
    VideoServerMessage::Error {
        error: err.client_message(),
        code: err.code(),
    }
}

/// Everything a running session needs, detached from the manager
struct SessionTask {
    context: Arc<VideoContext>,
    identity: Identity,
    outbound: mpsc::Sender<Outbound>,
    state: Arc<watch::Sender<SessionState>>,
}

impl SessionTask {
    async fn run(self, params: SessionParams, cancel: CancellationToken) {
        let deadline = self.context.config.request_timeout();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Video session for {} cancelled", params.serial);
                self.state.send_replace(SessionState::Cancelled);
                return;
            }
            result = tokio::time::timeout(deadline, self.stream(&params)) => result,
        };

        let result = result.unwrap_or_else(|_| {
            Err(VideoError::TimedOut {
                streaming: *self.state.borrow() == SessionState::Streaming,
            })
        });

        match result {
            Ok(StreamEnd::Finished { chunks, bytes }) => {
                send(&self.outbound, &VideoServerMessage::VideoComplete).await;
                self.state.send_replace(SessionState::Completed);
                info!(
                    "Video for {} delivered ({} chunks, {} bytes)",
                    params.serial, chunks, bytes
                );
            }
            Ok(StreamEnd::ConnectionClosed) => {
                self.state.send_replace(SessionState::Cancelled);
            }
            Err(e) => {
                match &e {
                    VideoError::Internal(inner) => {
                        error!("Video session for {} failed: {:#}", params.serial, inner)
                    }
                    other => warn!("Video session for {} failed: {}", params.serial, other),
                }
                send(&self.outbound, &error_message(&e)).await;
                self.state.send_replace(SessionState::Errored);
            }
        }
    }

    async fn stream(&self, params: &SessionParams) -> Result<StreamEnd, VideoError> {
        if !params.playback_enabled {
            return Err(VideoError::PlaybackDisabled);
        }

        let ctx = &self.context;

        if !ctx.authorizer.can_access(&self.identity, &params.serial).await? {
            return Err(VideoError::CameraNotFound(params.serial.clone()));
        }

        let clip = ctx
            .recording_server
            .fetch(&params.serial, &params.window)
            .await?;
        let reported_duration = clip.duration;
        let body = buffer(clip.body, ctx.config.max_clip_bytes).await?;

        let staged = ctx.pipeline.stage(body).await?;

        let (info, mime) = match ctx.probe.probe(staged.path()).await {
            Ok(info) => {
                let mime = mime_type(&info);
                (info, mime)
            }
            Err(e) => {
                debug!("Probe failed for {}, using fallback metadata: {}", params.serial, e);
                (
                    MediaInfo::fallback(&ctx.config.fallback_metadata),
                    ctx.config.fallback_metadata.mime_type.clone(),
                )
            }
        };

        let output = ctx.pipeline.start(staged).await?;

        self.state.send_replace(SessionState::Streaming);

        let metadata = VideoMetadata {
            duration: info.duration.unwrap_or(reported_duration),
            width: info.width,
            height: info.height,
            fps: info.fps,
            codec: info.codec,
            mime_type: mime,
        };

        if !send(&self.outbound, &VideoServerMessage::VideoMetadata(metadata)).await {
            output.abort().await;
            return Ok(StreamEnd::ConnectionClosed);
        }

        Ok(ChunkStreamer::new(self.outbound.clone()).relay(output).await?)
    }
}

/// Collect the whole clip; the transcoder needs random access
async fn buffer(
    mut body: futures::stream::BoxStream<'static, Result<Bytes, crate::video::FetchError>>,
    limit: usize,
) -> Result<Bytes, VideoError> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Err(VideoError::ClipTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }

    if buffer.is_empty() {
        return Err(VideoError::EmptyClip);
    }

    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;
    use crate::db::models::{DeviceFilter, VideoSettings};
    use crate::realtime::SubscriptionAuthorizer;
    use crate::services::testing::{
        device, elevated, standard, InMemoryDirectory, InMemoryIdentities, StaticSettings,
    };
    use crate::video::testing::{Script, ScriptedServer, StaticProbe};
    use crate::video::transcode::{FfmpegTranscoder, TranscodePipeline};
    use crate::video::{FetchErrorKind, VideoErrorCode};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};
    use std::path::Path;

    struct Harness {
        manager: VideoSessionManager,
        rx: mpsc::Receiver<Outbound>,
        server: Arc<ScriptedServer>,
        _dir: tempfile::TempDir,
        dir: std::path::PathBuf,
    }

    struct Setup {
        scripts: Vec<Script>,
        identity: Identity,
        settings: VideoSettings,
        transcoder: (&'static str, Vec<&'static str>),
        timeout_secs: u64,
        probe: Option<MediaInfo>,
        /// Whether the identity is still present in the store
        registered: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                scripts: vec![Script::Clip(vec![Bytes::from_static(b"moov"), Bytes::from_static(b"mdat")])],
                identity: elevated(),
                settings: VideoSettings::default(),
                transcoder: ("cat", vec!["{input}"]),
                timeout_secs: 5,
                probe: None,
                registered: true,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(ScriptedServer::new(setup.scripts));
        let directory = Arc::new(InMemoryDirectory::with(vec![
            device("ACCC8E000001", true, DeviceFilter::default()),
            device("ACCC8E000002", false, DeviceFilter::default()),
        ]));
        let identities = Arc::new(InMemoryIdentities::default());
        if setup.registered {
            identities.insert(setup.identity.clone());
        }
        let config = VideoConfig {
            request_timeout_secs: setup.timeout_secs,
            chunk_size: 4,
            temp_dir: Some(dir.path().to_path_buf()),
            ..VideoConfig::default()
        };
        let (binary, args) = setup.transcoder;
        let context = VideoContext {
            pipeline: TranscodePipeline::new(
                config.temp_dir(),
                config.chunk_size,
                Arc::new(FfmpegTranscoder::new(
                    binary,
                    args.into_iter().map(String::from).collect(),
                )),
            ),
            config,
            recording_server: server.clone(),
            probe: Arc::new(StaticProbe(setup.probe)),
            settings: Arc::new(StaticSettings(setup.settings)),
            authorizer: SubscriptionAuthorizer::new(directory, identities),
        };

        let (tx, rx) = mpsc::channel(64);
        Harness {
            manager: VideoSessionManager::new(Arc::new(context), setup.identity, tx),
            rx,
            server,
            dir: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    fn target() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap()
    }

    fn request(serial: &str) -> VideoRequest {
        VideoRequest {
            serial: Some(serial.to_string()),
            timestamp: Some(crate::video::protocol::Timestamp::Text(target().to_rfc3339())),
            pre_time: Some(5.0),
            post_time: Some(10.0),
            age: Some(3.0),
            format: None,
        }
    }

    async fn wait_until_settled(manager: &VideoSessionManager) -> SessionState {
        let mut state = manager.subscribe_state();
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                let current = *state.borrow_and_update();
                if !current.is_active() && current != SessionState::Idle {
                    return current;
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    enum Frame {
        Json(Value),
        Binary(Bytes),
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame {
                Outbound::Text(text) => frames.push(Frame::Json(serde_json::from_str(&text).unwrap())),
                Outbound::Binary(bytes) => frames.push(Frame::Binary(bytes)),
                _ => {}
            }
        }
        frames
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn streams_metadata_then_chunks_then_completion() {
        let mut h = harness(Setup::default());

        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Completed);

        let frames = drain(&mut h.rx);
        let Frame::Json(metadata) = &frames[0] else {
            panic!("metadata must come first");
        };
        assert_eq!(metadata["type"], "video_metadata");
        assert_eq!(metadata["duration"], 18.0);
        assert_eq!(metadata["width"], 1920);
        assert_eq!(metadata["mimeType"], "video/mp4; codecs=\"avc1.640029\"");

        let mut body = Vec::new();
        for frame in &frames[1..frames.len() - 1] {
            let Frame::Binary(bytes) = frame else {
                panic!("only binary frames between metadata and completion");
            };
            body.extend_from_slice(bytes);
        }
        assert_eq!(body, b"moovmdat");

        let Frame::Json(complete) = &frames[frames.len() - 1] else {
            panic!("completion must come last");
        };
        assert_eq!(complete, &json!({"type": "video_complete"}));

        let calls = h.server.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.start, target() - Duration::seconds(8));
        assert_eq!(calls[0].1.end, target() + Duration::seconds(10));
        assert!(is_empty(&h.dir));
    }

    #[tokio::test]
    async fn probed_metadata_is_reported() {
        let mut h = harness(Setup {
            probe: Some(MediaInfo {
                width: 1280,
                height: 720,
                fps: 30.0,
                codec: "h264".to_string(),
                profile: Some("Main".to_string()),
                level: Some(31),
                duration: Some(17.5),
            }),
            ..Setup::default()
        });

        h.manager.request(request("ACCC8E000001")).await;
        wait_until_settled(&h.manager).await;

        let Frame::Json(metadata) = &drain(&mut h.rx)[0] else {
            panic!("expected metadata");
        };
        assert_eq!(metadata["duration"], 17.5);
        assert_eq!(metadata["height"], 720);
        assert_eq!(metadata["mimeType"], "video/mp4; codecs=\"avc1.4D401F\"");
    }

    #[tokio::test]
    async fn fetch_timeout_is_a_recording_server_error() {
        let mut h = harness(Setup {
            scripts: vec![Script::Hang],
            timeout_secs: 1,
            ..Setup::default()
        });

        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Errored);

        let frames = drain(&mut h.rx);
        assert_eq!(frames.len(), 1);
        let Frame::Json(error) = &frames[0] else {
            panic!("expected an error message");
        };
        assert_eq!(error["code"], "RECORDING_SERVER_ERROR");
        assert!(is_empty(&h.dir));
    }

    #[tokio::test]
    async fn stalled_transcoder_times_out_as_stream_error() {
        let mut h = harness(Setup {
            transcoder: ("sh", vec!["-c", "cat \"$0\"; sleep 30", "{input}"]),
            timeout_secs: 1,
            ..Setup::default()
        });

        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Errored);

        let frames = drain(&mut h.rx);
        let Frame::Json(error) = frames.last().unwrap() else {
            panic!("expected an error message");
        };
        assert_eq!(error["code"], "STREAM_ERROR");
        assert!(is_empty(&h.dir));
    }

    #[tokio::test]
    async fn second_request_tears_down_the_first() {
        let mut h = harness(Setup {
            scripts: vec![
                Script::Hang,
                Script::Clip(vec![Bytes::from_static(b"second")]),
            ],
            ..Setup::default()
        });

        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(h.manager.state(), SessionState::Requesting);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while h.server.calls.lock().unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Completed);

        // Nothing from the first session: metadata, one chunk run, completion
        let frames = drain(&mut h.rx);
        let texts: Vec<String> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Json(v) => Some(v["type"].as_str().unwrap().to_string()),
                Frame::Binary(_) => None,
            })
            .collect();
        assert_eq!(texts, vec!["video_metadata", "video_complete"]);
        assert_eq!(h.server.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn close_cancels_silently() {
        let mut h = harness(Setup {
            transcoder: ("sh", vec!["-c", "cat \"$0\"; sleep 30", "{input}"]),
            ..Setup::default()
        });

        h.manager.request(request("ACCC8E000001")).await;
        let mut state = h.manager.subscribe_state();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            state.wait_for(|s| *s == SessionState::Streaming),
        )
        .await
        .unwrap()
        .unwrap();

        h.manager.close().await;
        assert_eq!(h.manager.state(), SessionState::Idle);

        let frames = drain(&mut h.rx);
        assert!(frames.iter().all(|f| match f {
            Frame::Json(v) => v["type"] == "video_metadata",
            Frame::Binary(_) => true,
        }));
        assert!(is_empty(&h.dir));
    }

    async fn single_error(setup: Setup, req: VideoRequest) -> Value {
        let mut h = harness(setup);
        h.manager.request(req).await;
        if h.manager.state() != SessionState::Idle {
            wait_until_settled(&h.manager).await;
        }
        let frames = drain(&mut h.rx);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Json(v) => v.clone(),
            Frame::Binary(_) => panic!("expected an error message"),
        }
    }

    #[tokio::test]
    async fn request_validation() {
        let missing_serial = VideoRequest {
            serial: None,
            ..request("x")
        };
        let error = single_error(Setup::default(), missing_serial).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let missing_timestamp = VideoRequest {
            timestamp: None,
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), missing_timestamp).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let negative = VideoRequest {
            pre_time: Some(-1.0),
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), negative).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let too_long = VideoRequest {
            post_time: Some(3600.0),
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), too_long).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let huge_pre_roll = VideoRequest {
            pre_time: Some(1e15),
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), huge_pre_roll).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let end_of_time = VideoRequest {
            timestamp: Some(crate::video::protocol::Timestamp::Text(
                chrono::DateTime::<Utc>::MAX_UTC.timestamp_millis().to_string(),
            )),
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), end_of_time).await;
        assert_eq!(error["code"], "INVALID_REQUEST");

        let format = VideoRequest {
            format: Some("webm".to_string()),
            ..request("ACCC8E000001")
        };
        let error = single_error(Setup::default(), format).await;
        assert_eq!(error["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn access_and_playback_checks() {
        let disabled = Setup {
            settings: VideoSettings {
                playback_enabled: false,
                ..VideoSettings::default()
            },
            ..Setup::default()
        };
        let error = single_error(disabled, request("ACCC8E000001")).await;
        assert_eq!(error["code"], "PLAYBACK_DISABLED");

        let error = single_error(Setup::default(), request("ACCC8E000002")).await;
        assert_eq!(error["code"], "CAMERA_NOT_FOUND");

        let error = single_error(Setup::default(), request("UNKNOWN")).await;
        assert_eq!(error["code"], "CAMERA_NOT_FOUND");

        let outsider = Setup {
            identity: standard(&["OTHER"]),
            ..Setup::default()
        };
        let error = single_error(outsider, request("ACCC8E000001")).await;
        assert_eq!(error["code"], "CAMERA_NOT_FOUND");

        let removed = Setup {
            registered: false,
            ..Setup::default()
        };
        let mut h = harness(removed);
        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Errored);
        let frames = drain(&mut h.rx);
        assert_eq!(frames.len(), 1);
        let Frame::Json(error) = &frames[0] else {
            panic!("expected an error message");
        };
        assert_eq!(error["code"], "CAMERA_NOT_FOUND");
        assert!(h.server.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_failures_map_to_codes() {
        for (kind, code) in [
            (FetchErrorKind::NotFound, VideoErrorCode::VideoNotFound),
            (FetchErrorKind::Unreachable, VideoErrorCode::RecordingServerError),
            (FetchErrorKind::AuthenticationFailed, VideoErrorCode::RecordingServerError),
        ] {
            let setup = Setup {
                scripts: vec![Script::Fail(kind)],
                ..Setup::default()
            };
            let error = single_error(setup, request("ACCC8E000001")).await;
            assert_eq!(error["code"], serde_json::to_value(code).unwrap());
        }

        let empty = Setup {
            scripts: vec![Script::Clip(vec![])],
            ..Setup::default()
        };
        let error = single_error(empty, request("ACCC8E000001")).await;
        assert_eq!(error["code"], "VIDEO_NOT_FOUND");

        let broken = Setup {
            transcoder: ("false", vec!["{input}"]),
            ..Setup::default()
        };
        let mut h = harness(broken);
        h.manager.request(request("ACCC8E000001")).await;
        assert_eq!(wait_until_settled(&h.manager).await, SessionState::Errored);
        let frames = drain(&mut h.rx);
        let Frame::Json(error) = frames.last().unwrap() else {
            panic!("expected an error message");
        };
        assert_eq!(error["code"], "STREAM_ERROR");
        assert!(is_empty(&h.dir));
    }

    #[tokio::test]
    async fn ping_and_garbage() {
        let mut h = harness(Setup::default());
        h.manager.handle_text(r#"{"type":"ping"}"#).await;
        h.manager.handle_text("{{{").await;

        let frames = drain(&mut h.rx);
        let Frame::Json(pong) = &frames[0] else { panic!() };
        assert_eq!(pong, &json!({"type": "pong"}));
        let Frame::Json(error) = &frames[1] else { panic!() };
        assert_eq!(error["code"], "INVALID_REQUEST");
    }
}
