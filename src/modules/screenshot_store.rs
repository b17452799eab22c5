use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modules::error::Result;
use crate::modules::storage::{load_json, save_json, KvStore, KEY_SCREENSHOTS};
use crate::modules::trigger::TriggerKind;

pub const MAX_SCREENSHOTS: usize = 50;
/// chrome.storage.local default quota.
pub const DEFAULT_QUOTA_BYTES: u64 = 10 * 1024 * 1024;
/// Eviction starts at this share of the quota, in percent.
const QUOTA_HIGH_WATERMARK_PERCENT: u128 = 90;
const QUOTA_EVICTION_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub image: String,
    pub thumbnail: String,
}

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotFilter {
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub since: Option<DateTime<Utc>>,
}

impl ScreenshotFilter {
    pub fn matches(&self, record: &ScreenshotRecord) -> bool {
        if let Some(trigger) = self.trigger {
            if record.trigger != trigger {
                return false;
            }
        }
        if let Some(ref domain) = self.domain {
            if &record.domain != domain {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        true
    }
}

fn near_quota(used: u64, quota: u64) -> bool {
    used as u128 * 100 >= quota as u128 * QUOTA_HIGH_WATERMARK_PERCENT
}

pub struct ScreenshotStore {
    kv: Arc<dyn KvStore>,
    capacity: usize,
    quota_bytes: u64,
}

impl ScreenshotStore {
    pub fn new(kv: Arc<dyn KvStore>, quota_bytes: u64) -> Self {
        Self::with_capacity(kv, MAX_SCREENSHOTS, quota_bytes)
    }

    /// Capacity is clamped to `1..=MAX_SCREENSHOTS`.
    pub fn with_capacity(kv: Arc<dyn KvStore>, capacity: usize, quota_bytes: u64) -> Self {
        Self {
            kv,
            capacity: capacity.clamp(1, MAX_SCREENSHOTS),
            quota_bytes,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest past capacity. When storage use
    /// then sits at or above 90% of the quota, the ten oldest records are
    /// dropped as well. Returns the number of records evicted.
    pub async fn append(&self, record: ScreenshotRecord) -> Result<usize> {
        let mut screenshots = self.load().await?;
        screenshots.push_back(record);

        let mut evicted = 0;
        while screenshots.len() > self.capacity {
            screenshots.pop_front();
            evicted += 1;
        }
        self.save(&screenshots).await?;

        let used = self.kv.bytes_in_use().await?;
        if near_quota(used, self.quota_bytes) {
            let count = QUOTA_EVICTION_COUNT.min(screenshots.len());
            screenshots.drain(..count);
            evicted += count;
            log::warn!(
                "Storage at {} of {} bytes, removed {} oldest screenshots",
                used,
                self.quota_bytes,
                count
            );
            self.save(&screenshots).await?;
        }

        Ok(evicted)
    }

    /// Matching records, newest first.
    pub async fn query(&self, filter: &ScreenshotFilter) -> Result<Vec<ScreenshotRecord>> {
        let mut matched: Vec<ScreenshotRecord> = self
            .load()
            .await?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matched)
    }

    pub async fn read_all(&self) -> Result<Vec<ScreenshotRecord>> {
        Ok(self.load().await?.into())
    }

    /// Remove the record with `id`. Missing ids are not an error.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut screenshots = self.load().await?;
        match screenshots.iter().position(|s| s.id == id) {
            Some(index) => {
                screenshots.remove(index);
                self.save(&screenshots).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.save(&VecDeque::new()).await
    }

    async fn load(&self) -> Result<VecDeque<ScreenshotRecord>> {
        Ok(load_json(self.kv.as_ref(), KEY_SCREENSHOTS).await?.unwrap_or_default())
    }

    async fn save(&self, screenshots: &VecDeque<ScreenshotRecord>) -> Result<()> {
        save_json(self.kv.as_ref(), KEY_SCREENSHOTS, screenshots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::storage::MemoryKvStore;
    use chrono::{Duration, TimeZone};
    use futures::future::BoxFuture;
    use serde_json::json;

    fn shot(id: &str, domain: &str, trigger: TriggerKind, at: DateTime<Utc>) -> ScreenshotRecord {
        ScreenshotRecord {
            id: id.to_string(),
            url: format!("https://{}/page", domain),
            domain: domain.to_string(),
            trigger,
            metadata: json!({}),
            timestamp: at,
            image: "data:image/png;base64,AAAA".to_string(),
            thumbnail: "data:image/jpeg;base64,AA".to_string(),
        }
    }

    fn ids(records: &[ScreenshotRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn never_exceeds_fifty() {
        let store = ScreenshotStore::new(Arc::new(MemoryKvStore::new()), u64::MAX);
        let now = Utc::now();

        for i in 0..55 {
            store
                .append(shot(&format!("s{}", i), "a.test", TriggerKind::Manual, now))
                .await
                .unwrap();
        }

        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), MAX_SCREENSHOTS);
        assert_eq!(all[0].id, "s5");
        assert_eq!(all[49].id, "s54");
    }

    #[tokio::test]
    async fn quota_pressure_removes_ten_oldest() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let now = Utc::now();
        let roomy = ScreenshotStore::new(kv.clone(), u64::MAX);
        for i in 0..15 {
            roomy
                .append(shot(&format!("s{}", i), "a.test", TriggerKind::Manual, now))
                .await
                .unwrap();
        }

        // any write now crosses 90% of a one-byte quota
        let tight = ScreenshotStore::new(kv, 1);
        let evicted = tight
            .append(shot("s15", "a.test", TriggerKind::Manual, now))
            .await
            .unwrap();

        assert_eq!(evicted, 10);
        let all = tight.read_all().await.unwrap();
        assert_eq!(ids(&all), vec!["s10", "s11", "s12", "s13", "s14", "s15"]);
    }

    /// Reports a fixed storage figure regardless of content.
    struct FixedUsage {
        inner: Arc<dyn KvStore>,
        bytes: u64,
    }

    impl KvStore for FixedUsage {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
            self.inner.set(key, value)
        }

        fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
            self.inner.remove(key)
        }

        fn bytes_in_use(&self) -> BoxFuture<'_, Result<u64>> {
            let bytes = self.bytes;
            Box::pin(async move { Ok(bytes) })
        }
    }

    async fn evicted_at_usage(bytes: u64) -> usize {
        let inner: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let now = Utc::now();
        let roomy = ScreenshotStore::new(inner.clone(), u64::MAX);
        for i in 0..11 {
            roomy
                .append(shot(&format!("s{}", i), "a.test", TriggerKind::Manual, now))
                .await
                .unwrap();
        }

        let store = ScreenshotStore::new(Arc::new(FixedUsage { inner, bytes }), 1000);
        store
            .append(shot("s11", "a.test", TriggerKind::Manual, now))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn eviction_starts_at_ninety_percent() {
        assert_eq!(evicted_at_usage(900).await, 10);
        assert_eq!(evicted_at_usage(899).await, 0);
    }

    #[test]
    fn watermark_arithmetic() {
        assert!(near_quota(9, 10));
        assert!(!near_quota(8, 10));
        assert!(near_quota(u64::MAX, u64::MAX));
        assert!(!near_quota(0, u64::MAX));
    }

    #[tokio::test]
    async fn below_watermark_keeps_everything() {
        let store = ScreenshotStore::new(Arc::new(MemoryKvStore::new()), DEFAULT_QUOTA_BYTES);
        let evicted = store
            .append(shot("only", "a.test", TriggerKind::Manual, Utc::now()))
            .await
            .unwrap();
        assert_eq!(evicted, 0);
        assert_eq!(store.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_filters_conjunctively_newest_first() {
        let store = ScreenshotStore::new(Arc::new(MemoryKvStore::new()), u64::MAX);
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        store.append(shot("old-form", "a.test", TriggerKind::FormSubmit, now - Duration::hours(2))).await.unwrap();
        store.append(shot("new-form", "a.test", TriggerKind::FormSubmit, now)).await.unwrap();
        store.append(shot("mid-form", "a.test", TriggerKind::FormSubmit, now - Duration::hours(1))).await.unwrap();
        store.append(shot("other-domain", "b.test", TriggerKind::FormSubmit, now)).await.unwrap();
        store.append(shot("periodic", "a.test", TriggerKind::Periodic, now)).await.unwrap();

        let everything = store.query(&ScreenshotFilter::default()).await.unwrap();
        assert_eq!(everything.len(), 5);

        let filter = ScreenshotFilter {
            trigger: Some(TriggerKind::FormSubmit),
            domain: Some("a.test".to_string()),
            since: Some(now - Duration::hours(1)),
        };
        let found = store.query(&filter).await.unwrap();
        // since is inclusive
        assert_eq!(ids(&found), vec!["new-form", "mid-form"]);
    }

    #[tokio::test]
    async fn delete_missing_id_is_noop() {
        let store = ScreenshotStore::new(Arc::new(MemoryKvStore::new()), u64::MAX);
        let now = Utc::now();
        store.append(shot("keep", "a.test", TriggerKind::Manual, now)).await.unwrap();
        store.append(shot("drop", "a.test", TriggerKind::Manual, now)).await.unwrap();

        assert!(!store.delete_by_id("nope").await.unwrap());
        assert_eq!(store.read_all().await.unwrap().len(), 2);

        assert!(store.delete_by_id("drop").await.unwrap());
        assert_eq!(ids(&store.read_all().await.unwrap()), vec!["keep"]);
    }

    #[test]
    fn capacity_is_clamped() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        assert_eq!(ScreenshotStore::with_capacity(kv.clone(), 500, 1).capacity(), 50);
        assert_eq!(ScreenshotStore::with_capacity(kv.clone(), 0, 1).capacity(), 1);
        assert_eq!(ScreenshotStore::with_capacity(kv, 20, 1).capacity(), 20);
    }

    #[test]
    fn filter_parses_from_request_json() {
        let filter: ScreenshotFilter =
            serde_json::from_str(r#"{"trigger":"repetitive_clicks","since":1700000000000}"#).unwrap();
        assert_eq!(filter.trigger, Some(TriggerKind::RepetitiveClicks));
        assert_eq!(filter.domain, None);
        assert_eq!(filter.since.map(|s| s.timestamp_millis()), Some(1_700_000_000_000));
    }
}
