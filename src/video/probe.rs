use crate::config::FallbackMetadata;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run probe: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed: {0}")]
    Output(String),
}

/// Stream properties of a staged clip
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub profile: Option<String>,
    pub level: Option<i64>,
    /// Seconds, when the container reports it
    pub duration: Option<f64>,
}

impl MediaInfo {
    pub fn fallback(defaults: &FallbackMetadata) -> Self {
        Self {
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
            codec: defaults.codec.clone(),
            profile: None,
            level: None,
            duration: None,
        }
    }
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name,profile,level,width,height,avg_frame_rate,r_frame_rate:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Output(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let info = parse_ffprobe_output(&output.stdout)?;
        debug!("Probed {}: {:?}", path.display(), info);
        Ok(info)
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i64>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output for the first video stream
pub fn parse_ffprobe_output(json: &[u8]) -> Result<MediaInfo, ProbeError> {
    let output: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| ProbeError::Output(e.to_string()))?;

    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::Output("no video stream".to_string()))?;

    let (Some(width), Some(height), Some(codec)) = (stream.width, stream.height, stream.codec_name)
    else {
        return Err(ProbeError::Output("incomplete stream description".to_string()));
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let duration = output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaInfo {
        width,
        height,
        fps,
        codec,
        profile: stream.profile,
        level: stream.level.filter(|l| *l > 0),
        duration,
    })
}

/// `"30000/1001"` or `"25"` to frames per second
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    (fps.is_finite() && fps > 0.0).then(|| (fps * 1000.0).round() / 1000.0)
}

/// MediaSource type string with codec parameters
pub fn mime_type(info: &MediaInfo) -> String {
    match info.codec.as_str() {
        "h264" => {
            let (profile_idc, constraints) = match info.profile.as_deref() {
                Some("Constrained Baseline") => (0x42, 0xE0),
                Some("Baseline") => (0x42, 0x00),
                Some("Main") => (0x4D, 0x40),
                Some("Extended") => (0x58, 0x00),
                Some("High 10") => (0x6E, 0x00),
                Some("High 4:2:2") => (0x7A, 0x00),
                _ => (0x64, 0x00),
            };
            let level = info.level.unwrap_or(41).clamp(0, 0xFF);
            format!(
                "video/mp4; codecs=\"avc1.{:02X}{:02X}{:02X}\"",
                profile_idc, constraints, level
            )
        }
        "hevc" | "h265" => {
            let profile = match info.profile.as_deref() {
                Some("Main 10") => "2.4",
                _ => "1.6",
            };
            let level = info.level.unwrap_or(120);
            format!("video/mp4; codecs=\"hvc1.{}.L{}.B0\"", profile, level)
        }
        _ => "video/mp4".to_string(),
    }
}
