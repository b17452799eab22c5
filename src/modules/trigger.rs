use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::modules::event::{ActivityEvent, EventKind};
use crate::modules::utils::Settings;

/// Input batches at or above this size count as high activity.
pub const HIGH_ACTIVITY_INPUT_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    FormSubmit,
    RepetitiveClicks,
    HighActivity,
    Periodic,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    pub trigger: TriggerKind,
    pub domain: String,
    pub metadata: serde_json::Value,
}

/// Decides per event whether a screenshot should be taken, throttled per
/// domain.
#[derive(Debug, Default)]
pub struct TriggerEvaluator {
    last_capture: HashMap<String, DateTime<Utc>>,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        event: &ActivityEvent,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Option<TriggerDecision> {
        if !settings.screenshot_enabled {
            return None;
        }

        let domain = event.hostname()?;

        if self.is_throttled(&domain, settings.screenshot_throttle_seconds, now) {
            log::debug!("Screenshot for {} throttled", domain);
            return None;
        }

        let (trigger, metadata) = match_rule(event, settings)?;

        // Recorded before the capture runs; a failed capture still uses up the window.
        self.last_capture.insert(domain.clone(), now);

        Some(TriggerDecision {
            trigger,
            domain,
            metadata,
        })
    }

    pub fn last_capture(&self, domain: &str) -> Option<DateTime<Utc>> {
        self.last_capture.get(domain).copied()
    }

    fn is_throttled(&self, domain: &str, throttle_seconds: u64, now: DateTime<Utc>) -> bool {
        match self.last_capture.get(domain) {
            // a window too long to represent never runs out
            Some(last) => match i64::try_from(throttle_seconds).ok().and_then(Duration::try_seconds) {
                Some(window) => now.signed_duration_since(*last) < window,
                None => true,
            },
            None => false,
        }
    }
}

fn match_rule(event: &ActivityEvent, settings: &Settings) -> Option<(TriggerKind, serde_json::Value)> {
    match &event.kind {
        EventKind::FormSubmit {
            action,
            method,
            field_count,
            form_id,
            ..
        } if settings.screenshot_on_form => Some((
            TriggerKind::FormSubmit,
            json!({
                "formId": form_id,
                "action": action,
                "method": method,
                "fieldCount": field_count,
            }),
        )),
        EventKind::RepetitiveClickPattern { xpath, count, .. } if settings.screenshot_on_repetitive => Some((
            TriggerKind::RepetitiveClicks,
            json!({ "xpath": xpath, "count": count }),
        )),
        EventKind::InputBatch { count, .. }
            if settings.screenshot_on_high_activity && *count >= HIGH_ACTIVITY_INPUT_COUNT =>
        {
            Some((TriggerKind::HighActivity, json!({ "inputCount": count })))
        }
        _ => None,
    }
}
