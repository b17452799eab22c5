use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::Rng;
use regex::Regex;

use crate::modules::error::{Result, TrackerError};
use crate::modules::event::TabInfo;
use crate::modules::screenshot_store::ScreenshotRecord;
use crate::modules::trigger::TriggerKind;
use crate::modules::utils::hostname_of;

static INTERNAL_PAGE: OnceLock<Regex> = OnceLock::new();

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Takes pictures of the visible page. Implemented by the host browser.
pub trait CaptureService: Send + Sync {
    /// Encoded image (data URL) of what `tab` currently shows.
    fn capture_visible<'a>(&'a self, tab: &'a TabInfo) -> BoxFuture<'a, Result<String>>;
    /// Reduced-size copy of a captured image.
    fn thumbnail<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Used when no browser is attached; every capture fails.
pub struct UnavailableCapture;

impl CaptureService for UnavailableCapture {
    fn capture_visible<'a>(&'a self, _tab: &'a TabInfo) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { Err(TrackerError::Capture("no capture backend attached".to_string())) })
    }

    fn thumbnail<'a>(&'a self, _image: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { Err(TrackerError::Capture("no capture backend attached".to_string())) })
    }
}

/// Browser-internal pages can't be captured.
pub fn is_internal_page(url: &str) -> bool {
    INTERNAL_PAGE
        .get_or_init(|| {
            Regex::new(r"(?i)^(chrome|chrome-extension|edge|about|devtools|moz-extension|view-source|brave):")
                .expect("internal page pattern is valid")
        })
        .is_match(url)
}

/// `<epoch ms>-<9 base36 chars>`. Collisions are unlikely, not impossible.
pub fn generate_screenshot_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

/// Capture `tab` and build a record for it. Capture failures are logged and
/// yield `None`; a failed thumbnail falls back to the full image.
pub async fn capture_page(
    service: &dyn CaptureService,
    tab: &TabInfo,
    trigger: TriggerKind,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Option<ScreenshotRecord> {
    if is_internal_page(&tab.url) {
        log::debug!("Skipping screenshot of internal page {}", tab.url);
        return None;
    }

    let image = match service.capture_visible(tab).await {
        Ok(image) => image,
        Err(e) => {
            log::warn!("Screenshot capture failed for {}: {}", tab.url, e);
            return None;
        }
    };

    let thumbnail = match service.thumbnail(&image).await {
        Ok(thumbnail) => thumbnail,
        Err(e) => {
            log::debug!("Thumbnail failed, keeping full image: {}", e);
            image.clone()
        }
    };

    Some(ScreenshotRecord {
        id: generate_screenshot_id(now),
        url: tab.url.clone(),
        domain: hostname_of(&tab.url).unwrap_or_default(),
        trigger,
        metadata,
        timestamp: now,
        image,
        thumbnail,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCapture;
    use super::*;
    use serde_json::json;

    fn tab(url: &str) -> TabInfo {
        TabInfo {
            id: 4,
            url: url.to_string(),
            title: "Page".to_string(),
            active: true,
        }
    }

    #[test]
    fn internal_schemes() {
        assert!(is_internal_page("chrome://settings"));
        assert!(is_internal_page("chrome-extension://abc/popup.html"));
        assert!(is_internal_page("about:blank"));
        assert!(is_internal_page("EDGE://newtab"));
        assert!(is_internal_page("brave://rewards"));
        assert!(!is_internal_page("https://chrome.google.com/"));
        assert!(!is_internal_page("http://about.test/"));
    }

    #[test]
    fn id_format() {
        let now = Utc::now();
        let id = generate_screenshot_id(now);
        let (millis, suffix) = id.split_once('-').unwrap();
        assert_eq!(millis, now.timestamp_millis().to_string());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn builds_record_from_capture() {
        let service = FakeCapture::default();
        let now = Utc::now();
        let record = capture_page(
            &service,
            &tab("https://app.test/orders"),
            TriggerKind::FormSubmit,
            json!({"formId": "order"}),
            now,
        )
        .await
        .unwrap();

        assert_eq!(record.domain, "app.test");
        assert_eq!(record.trigger, TriggerKind::FormSubmit);
        assert_eq!(record.image, "data:image/png;base64,FULL");
        assert_eq!(record.thumbnail, "data:image/jpeg;base64,THUMB");
        assert_eq!(record.metadata["formId"], "order");
        assert_eq!(record.timestamp, now);
    }

    #[tokio::test]
    async fn internal_page_never_reaches_service() {
        let service = FakeCapture::default();
        let record = capture_page(&service, &tab("chrome://history"), TriggerKind::Manual, json!({}), Utc::now()).await;
        assert!(record.is_none());
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn capture_failure_yields_none() {
        let service = FakeCapture {
            fail_capture: true,
            ..FakeCapture::default()
        };
        let record = capture_page(&service, &tab("https://a.test/"), TriggerKind::Manual, json!({}), Utc::now()).await;
        assert!(record.is_none());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn thumbnail_failure_keeps_full_image() {
        let service = FakeCapture {
            fail_thumbnail: true,
            ..FakeCapture::default()
        };
        let record = capture_page(&service, &tab("https://a.test/"), TriggerKind::Periodic, json!({}), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.thumbnail, record.image);
    }
}
