use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::modules::error::{Result, TrackerError};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    None,
    Openai,
    Anthropic,
}

/// User settings, stored separately from the tracked data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub ai_provider: AiProvider,
    #[serde(default)]
    pub ai_api_key: String,
    #[serde(default = "default_true")]
    pub track_clicks: bool,
    #[serde(default = "default_true")]
    pub track_forms: bool,
    #[serde(default = "default_true")]
    pub track_navigation: bool,
    #[serde(default = "default_true")]
    pub track_time: bool,
    #[serde(default = "default_true")]
    pub track_inputs: bool,
    /// Minutes between pattern analyses; 0 turns the timer off.
    #[serde(default = "default_analysis_interval")]
    pub analysis_interval: u64,
    #[serde(default = "default_true")]
    pub screenshot_enabled: bool,
    #[serde(default = "default_true")]
    pub screenshot_on_form: bool,
    #[serde(default = "default_true")]
    pub screenshot_on_repetitive: bool,
    #[serde(default = "default_true")]
    pub screenshot_on_high_activity: bool,
    #[serde(default)]
    pub screenshot_periodic: bool,
    #[serde(default = "default_throttle_seconds")]
    pub screenshot_throttle_seconds: u64,
    #[serde(default = "default_screenshot_max")]
    pub screenshot_max: usize,
    /// Days of activity to keep; 0 keeps everything.
    #[serde(default = "default_data_retention")]
    pub data_retention: u64,
    #[serde(default)]
    pub exclude_domains: String,
}

fn default_true() -> bool {
    true
}

fn default_analysis_interval() -> u64 {
    30
}

fn default_throttle_seconds() -> u64 {
    30
}

fn default_screenshot_max() -> usize {
    50
}

fn default_data_retention() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ai_provider: AiProvider::None,
            ai_api_key: String::new(),
            track_clicks: true,
            track_forms: true,
            track_navigation: true,
            track_time: true,
            track_inputs: true,
            analysis_interval: default_analysis_interval(),
            screenshot_enabled: true,
            screenshot_on_form: true,
            screenshot_on_repetitive: true,
            screenshot_on_high_activity: true,
            screenshot_periodic: false,
            screenshot_throttle_seconds: default_throttle_seconds(),
            screenshot_max: default_screenshot_max(),
            data_retention: default_data_retention(),
            exclude_domains: String::new(),
        }
    }
}

impl Settings {
    /// Whether recording is suppressed on `host` by the exclude list.
    /// Entries match the host itself and any of its subdomains.
    pub fn is_excluded(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.exclude_domains
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(|d| d.trim().trim_start_matches("*.").to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .any(|d| host == d || host.ends_with(&format!(".{}", d)))
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let settings_str = std::fs::read_to_string(path)
        .map_err(|e| TrackerError::Settings(format!("Failed to read settings file: {}", e)))?;

    let settings: Settings = serde_json::from_str(&settings_str)
        .map_err(|e| TrackerError::Settings(format!("Failed to parse settings: {}", e)))?;

    log::debug!(
        "Loaded settings - provider: {:?}, analysis every {} min, screenshots: {}",
        settings.ai_provider,
        settings.analysis_interval,
        settings.screenshot_enabled
    );

    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| TrackerError::Settings(format!("Failed to create settings directory: {}", e)))?;
    }

    let settings_str = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, settings_str)
        .map_err(|e| TrackerError::Settings(format!("Failed to write settings file: {}", e)))?;

    Ok(())
}

/// Hostname of `url`, or `None` when it does not parse. URLs without a host
/// (`file:`, `data:`) yield an empty hostname.
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    Some(parsed.host_str().unwrap_or("").to_string())
}
