use serde::{Deserialize, Serialize};

use crate::browser::TabId;
use crate::config::PublicAppConfig;

/// `windowId` the browser reports when focus left every window.
pub const WINDOW_ID_NONE: i64 = -1;

/// Browser lifecycle events the coordinator listens to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrowserSignal {
    NavigationCompleted {
        tab_id: TabId,
        frame_id: i64,
        url: String,
    },
    TabUpdated {
        tab_id: TabId,
        status: Option<String>,
        url: Option<String>,
    },
    TabActivated {
        tab_id: TabId,
    },
    WindowFocusChanged {
        window_id: i64,
    },
    Startup,
    Installed,
    TabRemoved {
        tab_id: TabId,
    },
}

/// Requests exchanged between popup, page and background.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtensionMessage {
    FixCurrentUrl,
    GetPageStatus,
    ShowNotification {
        message: String,
        #[serde(rename = "type", default)]
        kind: NotificationKind,
    },
    ResetStatusIndicator,
    GetCoordinatorStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    #[default]
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    pub is_satellite_view: bool,
    pub has_gl_parameter: bool,
    pub current_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub tracked_tabs: usize,
    pub processed_urls: usize,
    pub pending_rewrites: usize,
    pub config: PublicAppConfig,
}
