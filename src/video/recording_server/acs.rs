use super::{into_clip, FetchError, FetchErrorKind, FetchedClip, RecordingServer};
use crate::config::RecordingServerConfig;
use crate::video::TimeWindow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use log::debug;
use reqwest::Client;
use url::Url;

/// Camera-station export endpoint: `GET <base><export_path>?camera=&start=&end=`
/// with HTTP basic auth
pub struct AcsRecordingServer {
    client: Client,
    export_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl AcsRecordingServer {
    pub fn new(config: &RecordingServerConfig, client: Client) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid recording server URL: {}", config.base_url))?;
        let export_url = base
            .join(&config.export_path)
            .with_context(|| format!("Invalid export path: {}", config.export_path))?;

        Ok(Self {
            client,
            export_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl RecordingServer for AcsRecordingServer {
    fn name(&self) -> &'static str {
        "acs"
    }

    async fn fetch(&self, serial: &str, window: &TimeWindow) -> Result<FetchedClip, FetchError> {
        if window.end <= window.start {
            return Err(FetchError::new(
                FetchErrorKind::InvalidRequest,
                "empty time window",
            ));
        }

        let start = window.start.to_rfc3339_opts(SecondsFormat::Millis, true);
        let end = window.end.to_rfc3339_opts(SecondsFormat::Millis, true);

        debug!("ACS export {} from {} to {}", serial, start, end);

        let mut request = self.client.get(self.export_url.clone()).query(&[
            ("camera", serial),
            ("start", start.as_str()),
            ("end", end.as_str()),
        ]);

        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await?;

        into_clip(response, window)
    }
}
