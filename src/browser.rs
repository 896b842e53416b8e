use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// Opaque tab identifier assigned by the browser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
}

/// Browser tab operations the coordinator depends on.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Active tab of the focused window, if any.
    async fn active_tab(&self) -> AppResult<Option<TabInfo>>;

    /// `Ok(None)` when the tab no longer exists.
    async fn get_tab(&self, tab_id: TabId) -> AppResult<Option<TabInfo>>;

    /// Navigates the tab to `url`.
    async fn update_tab_url(&self, tab_id: TabId, url: &str) -> AppResult<()>;
}
