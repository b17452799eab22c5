use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::modules::utils::hostname_of;

/// A browser tab as reported by the host browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub active: bool,
}

/// A single recorded user/browser action.
///
/// Persisted flat, with the payload fields next to the common ones and the
/// variant named by `type`, e.g.
/// `{"type":"click","xpath":"/html/body","url":"...","title":"...","tabId":3,"timestamp":1700000000000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Navigation,
    #[serde(rename_all = "camelCase")]
    Click {
        #[serde(default)]
        element: String,
        #[serde(default, deserialize_with = "class_name_text")]
        class_name: String,
        #[serde(default)]
        id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        xpath: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FormSubmit {
        #[serde(default)]
        action: String,
        #[serde(default)]
        method: String,
        #[serde(default)]
        field_count: u32,
        #[serde(default)]
        form_id: String,
        #[serde(default, deserialize_with = "class_name_text")]
        form_class: String,
    },
    InputBatch {
        count: u32,
        #[serde(default)]
        inputs: Vec<InputRecord>,
    },
    Paste {
        #[serde(default)]
        element: String,
        #[serde(default)]
        length: u64,
    },
    Copy {
        #[serde(default)]
        element: String,
        #[serde(default)]
        length: u64,
    },
    KeyboardShortcut {
        key: String,
        #[serde(default)]
        ctrl: bool,
        #[serde(default)]
        alt: bool,
        #[serde(default)]
        shift: bool,
    },
    #[serde(rename_all = "camelCase")]
    ExcessiveScrolling {
        scroll_count: u32,
        #[serde(default)]
        duration: i64,
    },
    RepetitiveClickPattern {
        xpath: String,
        count: u32,
        #[serde(default)]
        element: String,
        #[serde(default)]
        text: Option<String>,
    },
    /// Milliseconds spent on a page, attributed to the hostname captured when
    /// the interval was closed.
    TimeSpent { duration: i64, domain: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    #[serde(default)]
    pub input_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// DOM `className` as text. SVG elements report an `SVGAnimatedString`
/// object; its `baseVal` is used.
fn class_name_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(map) => map
            .get("baseVal")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    })
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Navigation => "navigation",
            EventKind::Click { .. } => "click",
            EventKind::FormSubmit { .. } => "form_submit",
            EventKind::InputBatch { .. } => "input_batch",
            EventKind::Paste { .. } => "paste",
            EventKind::Copy { .. } => "copy",
            EventKind::KeyboardShortcut { .. } => "keyboard_shortcut",
            EventKind::ExcessiveScrolling { .. } => "excessive_scrolling",
            EventKind::RepetitiveClickPattern { .. } => "repetitive_click_pattern",
            EventKind::TimeSpent { .. } => "time_spent",
        }
    }
}

impl ActivityEvent {
    /// Stamp a payload with the sender tab and the current time.
    pub fn from_tab(kind: EventKind, tab: &TabInfo, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            url: tab.url.clone(),
            title: tab.title.clone(),
            tab_id: Some(tab.id),
            timestamp: now,
        }
    }

    pub fn navigation(tab: &TabInfo, now: DateTime<Utc>) -> Self {
        Self::from_tab(EventKind::Navigation, tab, now)
    }

    // time_spent records carry no tab id
    pub fn time_spent(tab: &TabInfo, domain: String, duration_ms: i64, now: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::TimeSpent {
                duration: duration_ms,
                domain,
            },
            url: tab.url.clone(),
            title: tab.title.clone(),
            tab_id: None,
            timestamp: now,
        }
    }

    pub fn hostname(&self) -> Option<String> {
        hostname_of(&self.url)
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self.kind, EventKind::Navigation)
    }

    pub fn is_click(&self) -> bool {
        matches!(self.kind, EventKind::Click { .. })
    }

    pub fn is_form_submit(&self) -> bool {
        matches!(self.kind, EventKind::FormSubmit { .. })
    }
}
