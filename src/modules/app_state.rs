use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::modules::activity_log::EventLogStore;
use crate::modules::ai_integration::{build_automation_prompt, CompletionProvider, HttpCompletionProvider};
use crate::modules::capture::{capture_page, CaptureService, UnavailableCapture};
use crate::modules::error::{Result, TrackerError};
use crate::modules::event::{ActivityEvent, EventKind, TabInfo};
use crate::modules::pattern_analyzer::{Pattern, PatternAnalyzer};
use crate::modules::screenshot_store::{ScreenshotFilter, ScreenshotRecord, ScreenshotStore};
use crate::modules::stats::{compute_stats, StatsSnapshot};
use crate::modules::storage::{KvStore, SqliteKvStore};
use crate::modules::tabs::TabRegistry;
use crate::modules::trigger::{TriggerEvaluator, TriggerKind};
use crate::modules::utils::{hostname_of, load_settings, save_settings, AiProvider, Settings};

const DATABASE_FILE: &str = "tracker.db";
const SETTINGS_FILE: &str = "settings.json";

/// Everything that only lives as long as the process.
#[derive(Debug, Default)]
pub struct SessionState {
    pub active_start: Option<DateTime<Utc>>,
    pub triggers: TriggerEvaluator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub activities: Vec<ActivityEvent>,
    pub patterns: Vec<Pattern>,
    pub screenshots: Vec<ScreenshotRecord>,
    /// ISO-8601, UTC.
    pub export_date: String,
}

pub struct Tracker {
    settings: Settings,
    settings_path: Option<PathBuf>,
    kv: Arc<dyn KvStore>,
    quota_bytes: u64,
    session: SessionState,
    tabs: TabRegistry,
    activity_log: EventLogStore,
    screenshots: ScreenshotStore,
    pattern_analyzer: PatternAnalyzer,
    capture: Arc<dyn CaptureService>,
    llm: Arc<dyn CompletionProvider>,
}

impl Tracker {
    pub fn new(kv: Arc<dyn KvStore>, settings: Settings, quota_bytes: u64) -> Self {
        let screenshots = ScreenshotStore::with_capacity(kv.clone(), settings.screenshot_max, quota_bytes);

        Self {
            settings,
            settings_path: None,
            activity_log: EventLogStore::new(kv.clone()),
            pattern_analyzer: PatternAnalyzer::new(kv.clone()),
            screenshots,
            kv,
            quota_bytes,
            session: SessionState::default(),
            tabs: TabRegistry::new(),
            capture: Arc::new(UnavailableCapture),
            llm: Arc::new(HttpCompletionProvider),
        }
    }

    /// Open (or create) the tracker database and settings file in `data_dir`.
    pub async fn open(data_dir: &Path, quota_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| TrackerError::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(DATABASE_FILE);
        let kv = SqliteKvStore::new(&db_path.to_string_lossy()).await?;

        let settings_path = data_dir.join(SETTINGS_FILE);
        let settings = load_settings(&settings_path)?;

        log::info!("Tracker data in {}", data_dir.display());

        let mut tracker = Self::new(Arc::new(kv), settings, quota_bytes);
        tracker.settings_path = Some(settings_path);
        Ok(tracker)
    }

    pub fn with_capture_service(mut self, capture: Arc<dyn CaptureService>) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_completion_provider(mut self, llm: Arc<dyn CompletionProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings and persist them when a settings file is attached.
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        if let Some(ref path) = self.settings_path {
            save_settings(path, &settings)?;
        }
        if settings.screenshot_max != self.settings.screenshot_max {
            self.screenshots =
                ScreenshotStore::with_capacity(self.kv.clone(), settings.screenshot_max, self.quota_bytes);
        }
        self.settings = settings;
        Ok(())
    }

    pub fn reset_settings(&mut self) -> Result<()> {
        self.update_settings(Settings::default())
    }

    pub fn tabs(&self) -> &TabRegistry {
        &self.tabs
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    // ---- tab lifecycle ----

    pub async fn tab_activated(&mut self, tab_id: Option<i64>, now: DateTime<Utc>) -> Result<()> {
        self.close_active_interval(now).await?;

        self.tabs.set_active(tab_id);
        self.session.active_start = tab_id.map(|_| now);
        Ok(())
    }

    pub async fn window_focus_changed(&mut self, tab_id: Option<i64>, now: DateTime<Utc>) -> Result<()> {
        self.tab_activated(tab_id, now).await
    }

    pub async fn tab_updated(&mut self, tab: TabInfo, status: &str, now: DateTime<Utc>) -> Result<()> {
        let loaded_in_front = status == "complete" && tab.active;
        let event = ActivityEvent::navigation(&tab, now);
        self.tabs.upsert(tab);

        if loaded_in_front && self.should_record(&event) {
            self.activity_log.append(event).await?;
        }
        Ok(())
    }

    /// Closing the focused tab drops its running interval unrecorded.
    pub fn tab_removed(&mut self, tab_id: i64) {
        if self.tabs.active_id() == Some(tab_id) {
            log::debug!("Focused tab {} closed, dropping its time spent", tab_id);
            self.session.active_start = None;
        }
        self.tabs.remove(tab_id);
    }

    /// Attribute the time since `active_start` to the focused tab.
    async fn close_active_interval(&mut self, now: DateTime<Utc>) -> Result<()> {
        let (Some(tab_id), Some(start)) = (self.tabs.active_id(), self.session.active_start) else {
            return Ok(());
        };

        let Some(tab) = self.tabs.get(tab_id) else {
            log::debug!("Tab {} no longer known, dropping time spent", tab_id);
            return Ok(());
        };
        let Some(domain) = hostname_of(&tab.url) else {
            log::debug!("Could not parse {} for time spent", tab.url);
            return Ok(());
        };

        let duration = now.signed_duration_since(start).num_milliseconds();
        let event = ActivityEvent::time_spent(tab, domain, duration, now);
        if self.should_record(&event) {
            self.activity_log.append(event).await?;
        }
        Ok(())
    }

    // ---- recording ----

    /// Record a page event from `tab` and take a screenshot when a trigger
    /// rule fires.
    pub async fn track_event(
        &mut self,
        tab: TabInfo,
        kind: EventKind,
        now: DateTime<Utc>,
    ) -> Result<Option<ScreenshotRecord>> {
        let event = ActivityEvent::from_tab(kind, &tab, now);
        self.tabs.upsert(tab.clone());

        if !self.should_record(&event) {
            return Ok(None);
        }

        self.activity_log.append(event.clone()).await?;

        let Some(decision) = self.session.triggers.evaluate(&event, &self.settings, now) else {
            return Ok(None);
        };

        log::debug!("Screenshot trigger {:?} on {}", decision.trigger, decision.domain);
        self.store_capture(&tab, decision.trigger, decision.metadata, now).await
    }

    fn should_record(&self, event: &ActivityEvent) -> bool {
        let tracked = match event.kind {
            EventKind::Click { .. } | EventKind::RepetitiveClickPattern { .. } => self.settings.track_clicks,
            EventKind::FormSubmit { .. } => self.settings.track_forms,
            EventKind::Navigation => self.settings.track_navigation,
            EventKind::TimeSpent { .. } => self.settings.track_time,
            EventKind::InputBatch { .. } | EventKind::Paste { .. } | EventKind::Copy { .. } => {
                self.settings.track_inputs
            }
            EventKind::KeyboardShortcut { .. } | EventKind::ExcessiveScrolling { .. } => true,
        };
        if !tracked {
            return false;
        }

        match event.hostname() {
            Some(host) => !self.settings.is_excluded(&host),
            None => true,
        }
    }

    // ---- screenshots ----

    /// Capture the focused tab on request.
    pub async fn capture_screenshot(
        &mut self,
        trigger: TriggerKind,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Option<ScreenshotRecord>> {
        let Some(tab) = self.tabs.active().cloned() else {
            log::debug!("No active tab to capture");
            return Ok(None);
        };
        self.store_capture(&tab, trigger, metadata, now).await
    }

    /// Timer-driven capture; ignores the per-domain throttle.
    pub async fn periodic_screenshot(&mut self, now: DateTime<Utc>) -> Result<Option<ScreenshotRecord>> {
        if !(self.settings.screenshot_enabled && self.settings.screenshot_periodic) {
            return Ok(None);
        }
        self.capture_screenshot(TriggerKind::Periodic, serde_json::json!({}), now).await
    }

    async fn store_capture(
        &mut self,
        tab: &TabInfo,
        trigger: TriggerKind,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Option<ScreenshotRecord>> {
        let Some(record) = capture_page(self.capture.as_ref(), tab, trigger, metadata, now).await else {
            return Ok(None);
        };

        let evicted = self.screenshots.append(record.clone()).await?;
        if evicted > 0 {
            log::info!("Storage near quota, evicted {} oldest screenshots", evicted);
        }
        Ok(Some(record))
    }

    pub async fn get_screenshots(&self, filter: &ScreenshotFilter) -> Result<Vec<ScreenshotRecord>> {
        self.screenshots.query(filter).await
    }

    /// `false` when no screenshot had that id.
    pub async fn delete_screenshot(&self, id: &str) -> Result<bool> {
        self.screenshots.delete_by_id(id).await
    }

    // ---- analysis ----

    pub async fn get_stats(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        let activities = self.activity_log.read_all().await?;
        let patterns = self.pattern_analyzer.latest_patterns().await?;
        let last_analysis = self.pattern_analyzer.last_analysis().await?;
        Ok(compute_stats(&activities, patterns, last_analysis, now))
    }

    pub async fn analyze_patterns(&self, now: DateTime<Utc>) -> Result<Vec<Pattern>> {
        let activities = self.activity_log.read_all().await?;
        self.pattern_analyzer.analyze(&activities, now).await
    }

    /// Drop activities older than the retention window. Returns how many went.
    pub async fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.settings.data_retention == 0 {
            return Ok(0);
        }
        // a window reaching past the representable range keeps everything
        let Some(cutoff) = i64::try_from(self.settings.data_retention)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|window| now.checked_sub_signed(window))
        else {
            return Ok(0);
        };
        let removed = self.activity_log.prune_older_than(cutoff).await?;
        if removed > 0 {
            log::info!("Retention removed {} activities older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Analysis timer body: retention first, then a fresh analysis.
    pub async fn scheduled_analysis(&self, now: DateTime<Utc>) -> Result<Vec<Pattern>> {
        self.apply_retention(now).await?;
        self.analyze_patterns(now).await
    }

    pub async fn export_data(&self, now: DateTime<Utc>) -> Result<ExportData> {
        Ok(ExportData {
            activities: self.activity_log.read_all().await?,
            patterns: self.pattern_analyzer.latest_patterns().await?,
            screenshots: self.screenshots.read_all().await?,
            export_date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    pub async fn clear_data(&mut self) -> Result<()> {
        self.activity_log.clear().await?;
        self.screenshots.clear().await?;
        self.pattern_analyzer.clear().await?;
        log::info!("All tracked data cleared");
        Ok(())
    }

    /// Ask the configured LLM for automation recommendations.
    pub async fn recommend_automation(&self, now: DateTime<Utc>) -> Result<String> {
        if self.settings.ai_provider == AiProvider::None || self.settings.ai_api_key.trim().is_empty() {
            return Err(TrackerError::AiNotConfigured);
        }

        let data = self.export_data(now).await?;
        let prompt = build_automation_prompt(&data)?;

        log::info!("Requesting automation recommendations from {:?}", self.settings.ai_provider);
        self.llm
            .complete(self.settings.ai_provider, &self.settings.ai_api_key, &prompt)
            .await
    }
}
