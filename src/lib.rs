// Module declarations
pub mod modules;

pub use modules::app_state::{ExportData, Tracker};
pub use modules::commands::{handle_line, handle_request, Request};
pub use modules::error::{Result, TrackerError};
pub use modules::utils::Settings;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};

const TIMER_TICK_SECS: u64 = 60;
const PERIODIC_SCREENSHOT_MINUTES: u64 = 5;

/// When the timer-driven jobs last ran.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    last_analysis: DateTime<Utc>,
    last_screenshot: DateTime<Utc>,
}

impl Schedule {
    pub fn new(started: DateTime<Utc>) -> Self {
        Self {
            last_analysis: started,
            last_screenshot: started,
        }
    }

    /// A period of 0 minutes, or one too long to represent, never comes due.
    fn is_due(last: DateTime<Utc>, period_minutes: u64, now: DateTime<Utc>) -> bool {
        if period_minutes == 0 {
            return false;
        }
        match i64::try_from(period_minutes).ok().and_then(Duration::try_minutes) {
            Some(period) => now.signed_duration_since(last) >= period,
            None => false,
        }
    }

    pub fn analysis_due(&self, settings: &Settings, now: DateTime<Utc>) -> bool {
        Self::is_due(self.last_analysis, settings.analysis_interval, now)
    }

    pub fn screenshot_due(&self, settings: &Settings, now: DateTime<Utc>) -> bool {
        settings.screenshot_enabled
            && settings.screenshot_periodic
            && Self::is_due(self.last_screenshot, PERIODIC_SCREENSHOT_MINUTES, now)
    }
}

async fn run_due_jobs(tracker: &mut Tracker, schedule: &mut Schedule, now: DateTime<Utc>) {
    if schedule.analysis_due(tracker.settings(), now) {
        schedule.last_analysis = now;
        match tracker.scheduled_analysis(now).await {
            Ok(patterns) => log::debug!("Scheduled analysis found {} patterns", patterns.len()),
            Err(e) => log::error!("Scheduled analysis failed: {}", e),
        }
    }

    if schedule.screenshot_due(tracker.settings(), now) {
        schedule.last_screenshot = now;
        if let Err(e) = tracker.periodic_screenshot(now).await {
            log::error!("Periodic screenshot failed: {}", e);
        }
    }
}

/// Serve newline-delimited JSON requests from stdin and run the timers until
/// stdin closes.
pub async fn run(tracker: Tracker) -> Result<()> {
    serve(tracker, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Answer one line per request read from `input` until it reaches EOF. A line
/// that is not UTF-8 gets an error answer; only I/O failures end the loop.
pub async fn serve<R, W>(mut tracker: Tracker, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut timer = interval(std::time::Duration::from_secs(TIMER_TICK_SECS));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut schedule = Schedule::new(Utc::now());
    let mut buf = Vec::new();

    log::info!("Activity tracker ready");

    loop {
        tokio::select! {
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    log::info!("Input closed, shutting down");
                    break;
                }

                let response = match std::str::from_utf8(&buf) {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(handle_line(&mut tracker, line, Utc::now()).await),
                    Err(e) => {
                        log::warn!("Discarding request that is not UTF-8: {}", e);
                        let error = TrackerError::InvalidRequest(format!("request is not valid UTF-8: {}", e));
                        Some(json!({ "error": error.to_string() }).to_string())
                    }
                };
                buf.clear();

                if let Some(response) = response {
                    output.write_all(response.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
            }
            _ = timer.tick() => {
                run_due_jobs(&mut tracker, &mut schedule, Utc::now()).await;
            }
        }
    }

    Ok(())
}
