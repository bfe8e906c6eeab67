use super::{into_clip, FetchError, FetchErrorKind, FetchedClip, RecordingServer};
use crate::config::RecordingServerConfig;
use crate::video::TimeWindow;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use log::debug;
use reqwest::Client;
use url::{form_urlencoded, Url};

const PLACEHOLDERS: &[&str] = &["{serial}", "{start}", "{end}", "{start_ms}", "{end_ms}"];

/// Generic export endpoint described by a URL template.
///
/// `export_path` may hold `{serial}`, `{start}`, `{end}` (RFC 3339) and
/// `{start_ms}`, `{end_ms}` (epoch milliseconds). Relative templates are
/// resolved against `base_url`.
pub struct HttpRecordingServer {
    client: Client,
    template: String,
    token: Option<String>,
}

impl HttpRecordingServer {
    pub fn new(config: &RecordingServerConfig, client: Client) -> Result<Self> {
        let template = if config.export_path.starts_with("http://")
            || config.export_path.starts_with("https://")
        {
            config.export_path.clone()
        } else {
            format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.export_path.trim_start_matches('/')
            )
        };

        if !PLACEHOLDERS.iter().any(|p| template.contains(p)) {
            bail!("Recording server URL template has no placeholders: {}", template);
        }

        Ok(Self {
            client,
            template,
            token: config.token.clone(),
        })
    }

    /// Fill the template for one request
    pub fn render(&self, serial: &str, window: &TimeWindow) -> Result<Url, FetchError> {
        let encode = |value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();

        let rendered = self
            .template
            .replace("{serial}", &encode(serial))
            .replace(
                "{start_ms}",
                &window.start.timestamp_millis().to_string(),
            )
            .replace("{end_ms}", &window.end.timestamp_millis().to_string())
            .replace(
                "{start}",
                &encode(&window.start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
            .replace(
                "{end}",
                &encode(&window.end.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );

        Url::parse(&rendered)
            .map_err(|e| FetchError::new(FetchErrorKind::InvalidRequest, format!("bad export URL: {}", e)))
    }
}

#[async_trait]
impl RecordingServer for HttpRecordingServer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, serial: &str, window: &TimeWindow) -> Result<FetchedClip, FetchError> {
        if window.end <= window.start {
            return Err(FetchError::new(
                FetchErrorKind::InvalidRequest,
                "empty time window",
            ));
        }

        let url = self.render(serial, window)?;
        debug!("HTTP export {}", url);

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        into_clip(response, window)
    }
}
