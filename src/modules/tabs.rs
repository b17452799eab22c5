use std::collections::HashMap;

use crate::modules::event::TabInfo;

/// Open tabs as last reported by the browser, plus which one has focus.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<i64, TabInfo>,
    active: Option<i64>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Focus only moves through `set_active`.
    pub fn upsert(&mut self, tab: TabInfo) {
        self.tabs.insert(tab.id, tab);
    }

    pub fn remove(&mut self, tab_id: i64) -> Option<TabInfo> {
        if self.active == Some(tab_id) {
            self.active = None;
        }
        self.tabs.remove(&tab_id)
    }

    pub fn set_active(&mut self, tab_id: Option<i64>) {
        self.active = tab_id;
    }

    /// `None` once the tab has been closed.
    pub fn get(&self, tab_id: i64) -> Option<&TabInfo> {
        self.tabs.get(&tab_id)
    }

    pub fn active_id(&self) -> Option<i64> {
        self.active
    }

    pub fn active(&self) -> Option<&TabInfo> {
        self.active.and_then(|id| self.tabs.get(&id))
    }
}
