use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::modules::error::Result;
use crate::modules::event::{ActivityEvent, EventKind};
use crate::modules::storage::{load_json, save_json, KvStore, KEY_LAST_ANALYSIS, KEY_PATTERNS};

const MS_PER_HOUR: f64 = 1000.0 * 60.0 * 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }
}

/// Values at or above `high` are high, at or above `medium` medium, anything
/// else low.
#[derive(Debug, Clone, Copy)]
pub struct SeverityThresholds {
    pub medium: f64,
    pub high: f64,
}

/// A detection rule: the minimum value that produces a finding and the
/// severity bands above it.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRule {
    pub minimum: f64,
    pub severity: SeverityThresholds,
}

pub const REPETITIVE_NAVIGATION: DetectionRule = DetectionRule {
    minimum: 5.0,
    severity: SeverityThresholds { medium: 10.0, high: 20.0 },
};

pub const REPETITIVE_FORMS: DetectionRule = DetectionRule {
    minimum: 3.0,
    severity: SeverityThresholds { medium: 5.0, high: 10.0 },
};

pub const HIGH_CLICK_ACTIVITY: DetectionRule = DetectionRule {
    minimum: 50.0,
    severity: SeverityThresholds { medium: 100.0, high: 200.0 },
};

/// Measured in hours.
pub const TIME_SINK: DetectionRule = DetectionRule {
    minimum: 2.0,
    severity: SeverityThresholds { medium: 4.0, high: 8.0 },
};

pub fn severity_for(value: f64, thresholds: &SeverityThresholds) -> Severity {
    if value >= thresholds.high {
        Severity::High
    } else if value >= thresholds.medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternKind {
    RepetitiveNavigation { url: String, count: u64 },
    RepetitiveForms { domain: String, count: u64 },
    HighClickActivity { domain: String, count: u64 },
    /// `hours` is pre-formatted with two decimals.
    TimeSink { domain: String, hours: String },
}

/// A finding about repeated behavior. Recomputed wholesale on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(flatten)]
    pub kind: PatternKind,
    pub severity: Severity,
    pub suggestion: String,
}

/// Runs the detection rules over the activity log and keeps the latest
/// findings under `patterns` / `lastAnalysis`.
pub struct PatternAnalyzer {
    kv: Arc<dyn KvStore>,
}

impl PatternAnalyzer {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Detect patterns and replace the stored findings with them.
    pub async fn analyze(&self, activities: &[ActivityEvent], now: DateTime<Utc>) -> Result<Vec<Pattern>> {
        let patterns = detect_patterns(activities);

        save_json(self.kv.as_ref(), KEY_PATTERNS, &patterns).await?;
        save_json(self.kv.as_ref(), KEY_LAST_ANALYSIS, &now.timestamp_millis()).await?;

        log::info!(
            "Pattern analysis over {} events found {} patterns",
            activities.len(),
            patterns.len()
        );
        Ok(patterns)
    }

    pub async fn latest_patterns(&self) -> Result<Vec<Pattern>> {
        Ok(load_json(self.kv.as_ref(), KEY_PATTERNS).await?.unwrap_or_default())
    }

    pub async fn last_analysis(&self) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<Option<i64>> = load_json(self.kv.as_ref(), KEY_LAST_ANALYSIS).await?;
        Ok(millis.flatten().and_then(DateTime::from_timestamp_millis))
    }

    pub async fn clear(&self) -> Result<()> {
        save_json(self.kv.as_ref(), KEY_PATTERNS, &Vec::<Pattern>::new()).await?;
        save_json(self.kv.as_ref(), KEY_LAST_ANALYSIS, &Option::<i64>::None).await
    }
}

/// All findings, high severity first; equal severities keep detection order.
pub fn detect_patterns(activities: &[ActivityEvent]) -> Vec<Pattern> {
    let mut patterns = Vec::new();
    patterns.extend(repetitive_navigation(activities));
    patterns.extend(repetitive_forms(activities));
    patterns.extend(high_click_activity(activities));
    patterns.extend(time_sinks(activities));

    // stable: ties keep rule order, then first-seen order within a rule
    patterns.sort_by_key(|p| p.severity.rank());
    patterns
}

fn repetitive_navigation(activities: &[ActivityEvent]) -> Vec<Pattern> {
    let mut url_counts: IndexMap<&str, u64> = IndexMap::new();
    for activity in activities.iter().filter(|a| a.is_navigation()) {
        *url_counts.entry(activity.url.as_str()).or_insert(0) += 1;
    }

    url_counts
        .into_iter()
        .filter(|(_, count)| *count as f64 >= REPETITIVE_NAVIGATION.minimum)
        .map(|(url, count)| Pattern {
            severity: severity_for(count as f64, &REPETITIVE_NAVIGATION.severity),
            suggestion: format!(
                "User visits {} {} times - consider automation or bookmark shortcut",
                url, count
            ),
            kind: PatternKind::RepetitiveNavigation {
                url: url.to_string(),
                count,
            },
        })
        .collect()
}

fn repetitive_forms(activities: &[ActivityEvent]) -> Vec<Pattern> {
    count_by_hostname(activities, ActivityEvent::is_form_submit)
        .into_iter()
        .filter(|(_, count)| *count as f64 >= REPETITIVE_FORMS.minimum)
        .map(|(domain, count)| Pattern {
            severity: severity_for(count as f64, &REPETITIVE_FORMS.severity),
            suggestion: format!(
                "User submits {} forms on {} - consider form auto-fill or API automation",
                count, domain
            ),
            kind: PatternKind::RepetitiveForms { domain, count },
        })
        .collect()
}

fn high_click_activity(activities: &[ActivityEvent]) -> Vec<Pattern> {
    count_by_hostname(activities, ActivityEvent::is_click)
        .into_iter()
        .filter(|(_, count)| *count as f64 >= HIGH_CLICK_ACTIVITY.minimum)
        .map(|(domain, count)| Pattern {
            severity: severity_for(count as f64, &HIGH_CLICK_ACTIVITY.severity),
            suggestion: format!(
                "User made {} clicks on {} - investigate for repetitive workflows",
                count, domain
            ),
            kind: PatternKind::HighClickActivity { domain, count },
        })
        .collect()
}

fn time_sinks(activities: &[ActivityEvent]) -> Vec<Pattern> {
    time_by_domain(activities)
        .into_iter()
        .filter_map(|(domain, millis)| {
            let hours = millis as f64 / MS_PER_HOUR;
            if hours < TIME_SINK.minimum {
                return None;
            }
            let hours_text = two_decimals(hours);
            Some(Pattern {
                severity: severity_for(hours, &TIME_SINK.severity),
                suggestion: format!(
                    "User spent {} hours on {} - check if task can be automated",
                    hours_text, domain
                ),
                kind: PatternKind::TimeSink {
                    domain,
                    hours: hours_text,
                },
            })
        })
        .collect()
}

/// Two-decimal text of a non-negative value. Exact ties round up; `{:.2}`
/// alone would round them to even.
fn two_decimals(value: f64) -> String {
    let exact = format!("{:.64}", value);
    let is_tie = exact
        .split_once('.')
        .map(|(_, fraction)| {
            let rest = &fraction[2..];
            rest.starts_with('5') && rest[1..].bytes().all(|b| b == b'0')
        })
        .unwrap_or(false);

    if is_tie {
        // nudge past the midpoint; far below the next rounding boundary
        format!("{:.2}", value + 0.001)
    } else {
        format!("{:.2}", value)
    }
}

/// Count matching events per URL hostname, in first-seen order. Events whose
/// URL does not parse are left out.
fn count_by_hostname(activities: &[ActivityEvent], include: fn(&ActivityEvent) -> bool) -> IndexMap<String, u64> {
    let mut counts = IndexMap::new();
    for activity in activities.iter().filter(|a| include(a)) {
        match activity.hostname() {
            Some(domain) => *counts.entry(domain).or_insert(0) += 1,
            None => log::debug!("Skipping {} with unparsable url {}", activity.kind.type_name(), activity.url),
        }
    }
    counts
}

/// Total `time_spent` milliseconds per recorded domain, in first-seen order.
pub fn time_by_domain(activities: &[ActivityEvent]) -> IndexMap<String, i64> {
    let mut totals = IndexMap::new();
    for activity in activities {
        if let EventKind::TimeSpent { duration, domain } = &activity.kind {
            *totals.entry(domain.clone()).or_insert(0) += *duration;
        }
    }
    totals
}
