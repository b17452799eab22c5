use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::modules::app_state::Tracker;
use crate::modules::error::{Result, TrackerError};
use crate::modules::event::{EventKind, TabInfo};
use crate::modules::screenshot_store::ScreenshotFilter;
use crate::modules::trigger::TriggerKind;
use crate::modules::utils::Settings;

/// Messages the browser side sends, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    TrackEvent {
        tab: TabInfo,
        data: EventKind,
    },
    GetStats,
    AnalyzePatterns,
    ExportData,
    GetScreenshots {
        #[serde(default)]
        filter: ScreenshotFilter,
    },
    DeleteScreenshot {
        id: String,
    },
    CaptureScreenshot {
        #[serde(default = "default_capture_trigger")]
        trigger: TriggerKind,
        #[serde(default = "empty_object")]
        metadata: serde_json::Value,
    },
    ClearData,
    RecommendAutomation,
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: i64,
    },
    TabUpdated {
        tab: TabInfo,
        #[serde(default)]
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved {
        tab_id: i64,
    },
    #[serde(rename_all = "camelCase")]
    WindowFocusChanged {
        #[serde(default)]
        tab_id: Option<i64>,
    },
    GetSettings,
    SaveSettings {
        settings: Settings,
    },
    ResetSettings,
}

fn default_capture_trigger() -> TriggerKind {
    TriggerKind::Manual
}

fn empty_object() -> serde_json::Value {
    json!({})
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| TrackerError::InvalidRequest(e.to_string()))
    }
}

pub async fn handle_request(tracker: &mut Tracker, request: Request, now: DateTime<Utc>) -> Result<serde_json::Value> {
    let response = match request {
        Request::TrackEvent { tab, data } => {
            tracker.track_event(tab, data, now).await?;
            serde_json::Value::Null
        }
        Request::GetStats => serde_json::to_value(tracker.get_stats(now).await?)?,
        Request::AnalyzePatterns => serde_json::to_value(tracker.analyze_patterns(now).await?)?,
        Request::ExportData => serde_json::to_value(tracker.export_data(now).await?)?,
        Request::GetScreenshots { filter } => serde_json::to_value(tracker.get_screenshots(&filter).await?)?,
        Request::DeleteScreenshot { id } => {
            if !tracker.delete_screenshot(&id).await? {
                log::debug!("Screenshot {} already gone", id);
            }
            json!({ "success": true })
        }
        Request::CaptureScreenshot { trigger, metadata } => {
            serde_json::to_value(tracker.capture_screenshot(trigger, metadata, now).await?)?
        }
        Request::ClearData => {
            tracker.clear_data().await?;
            json!({ "success": true })
        }
        Request::RecommendAutomation => {
            let recommendation = tracker.recommend_automation(now).await?;
            json!({ "recommendation": recommendation })
        }
        Request::TabActivated { tab_id } => {
            tracker.tab_activated(Some(tab_id), now).await?;
            serde_json::Value::Null
        }
        Request::TabUpdated { tab, status } => {
            tracker.tab_updated(tab, &status, now).await?;
            serde_json::Value::Null
        }
        Request::TabRemoved { tab_id } => {
            tracker.tab_removed(tab_id);
            serde_json::Value::Null
        }
        Request::WindowFocusChanged { tab_id } => {
            tracker.window_focus_changed(tab_id, now).await?;
            serde_json::Value::Null
        }
        Request::GetSettings => serde_json::to_value(tracker.settings())?,
        Request::SaveSettings { settings } => {
            tracker.update_settings(settings)?;
            json!({ "success": true })
        }
        Request::ResetSettings => {
            tracker.reset_settings()?;
            serde_json::to_value(tracker.settings())?
        }
    };

    Ok(response)
}

/// Parse one JSON request line and answer with one JSON line. Failures come
/// back as `{"error": "..."}`.
pub async fn handle_line(tracker: &mut Tracker, line: &str, now: DateTime<Utc>) -> String {
    let result = match Request::parse(line) {
        Ok(request) => handle_request(tracker, request, now).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(value) => value.to_string(),
        Err(e) => {
            log::warn!("Request failed: {}", e);
            json!({ "error": e.to_string() }).to_string()
        }
    }
}
