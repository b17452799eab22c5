use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::modules::error::Result;
use crate::modules::event::ActivityEvent;
use crate::modules::storage::{load_json, save_json, KvStore, KEY_ACTIVITIES};

pub const MAX_ACTIVITIES: usize = 10_000;

/// Append-only activity log persisted under `activities`, oldest first.
pub struct EventLogStore {
    kv: Arc<dyn KvStore>,
    capacity: usize,
}

impl EventLogStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_capacity(kv, MAX_ACTIVITIES)
    }

    pub fn with_capacity(kv: Arc<dyn KvStore>, capacity: usize) -> Self {
        Self { kv, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn append(&self, event: ActivityEvent) -> Result<()> {
        let mut activities = self.load().await?;
        activities.push_back(event);

        while activities.len() > self.capacity {
            activities.pop_front();
        }

        save_json(self.kv.as_ref(), KEY_ACTIVITIES, &activities).await
    }

    pub async fn read_all(&self) -> Result<Vec<ActivityEvent>> {
        Ok(self.load().await?.into())
    }

    pub async fn clear(&self) -> Result<()> {
        save_json(self.kv.as_ref(), KEY_ACTIVITIES, &Vec::<ActivityEvent>::new()).await
    }

    /// Drop every event recorded before `cutoff`. Returns how many were removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut activities = self.load().await?;
        let before = activities.len();
        activities.retain(|a| a.timestamp >= cutoff);

        let removed = before - activities.len();
        if removed > 0 {
            save_json(self.kv.as_ref(), KEY_ACTIVITIES, &activities).await?;
        }
        Ok(removed)
    }

    async fn load(&self) -> Result<VecDeque<ActivityEvent>> {
        Ok(load_json(self.kv.as_ref(), KEY_ACTIVITIES).await?.unwrap_or_default())
    }
}
