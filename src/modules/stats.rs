use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::modules::event::ActivityEvent;
use crate::modules::pattern_analyzer::{time_by_domain, Pattern};

const TOP_DOMAIN_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTime {
    pub domain: String,
    /// Milliseconds.
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_events: usize,
    pub today_events: usize,
    pub week_events: usize,
    pub click_count: usize,
    pub form_submissions: usize,
    pub navigations: usize,
    pub top_domains: Vec<DomainTime>,
    pub patterns: Vec<Pattern>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_analysis: Option<DateTime<Utc>>,
}

/// Summarize the activity log as of `now`. Window bounds are inclusive: an
/// event exactly 24 hours old still counts as today.
pub fn compute_stats(
    activities: &[ActivityEvent],
    patterns: Vec<Pattern>,
    last_analysis: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatsSnapshot {
    let one_day_ago = now - Duration::hours(24);
    let one_week_ago = now - Duration::days(7);

    let today: Vec<&ActivityEvent> = activities.iter().filter(|a| a.timestamp >= one_day_ago).collect();
    let week_events = activities.iter().filter(|a| a.timestamp >= one_week_ago).count();

    let mut top_domains: Vec<DomainTime> = time_by_domain(activities)
        .into_iter()
        .map(|(domain, time)| DomainTime { domain, time })
        .collect();
    top_domains.sort_by(|a, b| b.time.cmp(&a.time));
    top_domains.truncate(TOP_DOMAIN_LIMIT);

    StatsSnapshot {
        total_events: activities.len(),
        today_events: today.len(),
        week_events,
        click_count: today.iter().filter(|a| a.is_click()).count(),
        form_submissions: today.iter().filter(|a| a.is_form_submit()).count(),
        navigations: today.iter().filter(|a| a.is_navigation()).count(),
        top_domains,
        patterns,
        last_analysis,
    }
}
