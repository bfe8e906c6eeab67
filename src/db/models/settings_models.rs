use serde::{Deserialize, Serialize};

/// Key of the video settings row in `system_settings`
pub const VIDEO_SETTINGS_KEY: &str = "video";

/// Playback settings owned by the settings collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    #[serde(default = "default_playback_enabled")]
    pub playback_enabled: bool,
    /// Seconds before the target timestamp
    #[serde(default)]
    pub default_pre_time: Option<f64>,
    /// Seconds after the target timestamp
    #[serde(default)]
    pub default_post_time: Option<f64>,
}

fn default_playback_enabled() -> bool {
    true
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            playback_enabled: true,
            default_pre_time: None,
            default_post_time: None,
        }
    }
}
