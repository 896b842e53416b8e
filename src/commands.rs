use serde_json::Value;
use tracing::{info, warn};

use crate::classifier::is_satellite_view;
use crate::coordinator::Coordinator;
use crate::errors::AppResult;
use crate::protocol::{CoordinatorStatus, ExtensionMessage, FixResponse};
use crate::rewriter::add_region_param_for;

const FIX_SUCCESS_MESSAGE: &str = "URL fixed successfully!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixFailure {
    NoActiveTab,
    NotSatelliteView,
    AlreadyCorrect,
}

impl FixFailure {
    pub fn message(&self) -> &'static str {
        match self {
            FixFailure::NoActiveTab => "No active tab found.",
            FixFailure::NotSatelliteView => "Current page is not a Google Maps satellite view.",
            FixFailure::AlreadyCorrect => {
                "URL already has gl=es parameter or is not a satellite view."
            }
        }
    }
}

impl From<FixFailure> for FixResponse {
    fn from(failure: FixFailure) -> Self {
        FixResponse {
            success: false,
            message: failure.message().to_string(),
        }
    }
}

impl Coordinator {
    /// Fixes the active tab right away on explicit user request.
    pub async fn fix_current_url(&self) -> FixResponse {
        let tab = match self.browser.active_tab().await {
            Ok(tab) => tab,
            Err(err) => {
                warn!(?err, "failed to query active tab for manual fix");
                None
            }
        };
        let (tab_id, url) = match tab {
            Some(tab) => match tab.url {
                Some(url) if !url.is_empty() => (tab.id, url),
                _ => return FixFailure::NoActiveTab.into(),
            },
            None => return FixFailure::NoActiveTab.into(),
        };

        if !is_satellite_view(&url) {
            return FixFailure::NotSatelliteView.into();
        }
        let fixed = match add_region_param_for(&url, &self.config.region_code) {
            Some(fixed) if fixed != url => fixed,
            _ => return FixFailure::AlreadyCorrect.into(),
        };

        {
            let mut state = self.state.lock();
            state.tracker.mark_tab_fixed(tab_id);
            state.cancel_pending(tab_id);
        }

        match self.browser.update_tab_url(tab_id, &fixed).await {
            Ok(()) => {
                info!(%tab_id, to = %fixed, "applied manual satellite url fix");
                FixResponse {
                    success: true,
                    message: FIX_SUCCESS_MESSAGE.to_string(),
                }
            }
            Err(err) => {
                warn!(?err, %tab_id, "manual fix could not update tab");
                FixResponse {
                    success: false,
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn status(&self) -> CoordinatorStatus {
        let state = self.state.lock();
        CoordinatorStatus {
            tracked_tabs: state.tracker.tracked_tabs(),
            processed_urls: state.tracker.processed_urls(),
            pending_rewrites: state.pending.len(),
            config: self.config.public_profile(),
        }
    }

    /// Answers a background-directed message. Page-directed actions get
    /// `None`; the page agent responds to those.
    pub async fn handle_message(&self, message: ExtensionMessage) -> AppResult<Option<Value>> {
        let response = match message {
            ExtensionMessage::FixCurrentUrl => serde_json::to_value(self.fix_current_url().await)?,
            ExtensionMessage::GetCoordinatorStatus => serde_json::to_value(self.status())?,
            ExtensionMessage::GetPageStatus
            | ExtensionMessage::ShowNotification { .. }
            | ExtensionMessage::ResetStatusIndicator => return Ok(None),
        };
        Ok(Some(response))
    }
}
