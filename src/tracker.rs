use std::collections::HashSet;

use tracing::debug;

use crate::browser::TabId;

/// Process-lifetime record of which tabs and URLs were already rewritten.
///
/// A tab stays fixed until [`FixTracker::unmark_tab`] is called for it. The
/// processed URL set is bounded coarsely: once it grows past `capacity` it is
/// dropped wholesale the next time a tab closes.
#[derive(Debug)]
pub struct FixTracker {
    fixed_tabs: HashSet<TabId>,
    processed_urls: HashSet<String>,
    capacity: usize,
}

impl FixTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            fixed_tabs: HashSet::new(),
            processed_urls: HashSet::new(),
            capacity,
        }
    }

    pub fn is_tab_fixed(&self, tab_id: TabId) -> bool {
        self.fixed_tabs.contains(&tab_id)
    }

    pub fn mark_tab_fixed(&mut self, tab_id: TabId) {
        self.fixed_tabs.insert(tab_id);
    }

    pub fn unmark_tab(&mut self, tab_id: TabId) {
        self.fixed_tabs.remove(&tab_id);
        if self.processed_urls.len() > self.capacity {
            debug!(
                size = self.processed_urls.len(),
                "clearing processed url cache"
            );
            self.processed_urls.clear();
        }
    }

    pub fn is_url_processed(&self, url: &str) -> bool {
        self.processed_urls.contains(url)
    }

    pub fn mark_url_processed(&mut self, url: impl Into<String>) {
        self.processed_urls.insert(url.into());
    }

    pub fn tracked_tabs(&self) -> usize {
        self.fixed_tabs.len()
    }

    pub fn processed_urls(&self) -> usize {
        self.processed_urls.len()
    }
}
