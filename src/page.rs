use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::classifier::SATELLITE_MARKER;
use crate::config::DEFAULT_REGION_CODE;
use crate::errors::AppResult;
use crate::protocol::{ExtensionMessage, NotificationKind, PageStatus, ResetResponse};
use crate::rewriter::has_region_param;

const MAPS_URL_MARKER: &str = "google.com/maps";

/// How long the indicator shows "processing"; matches the rewrite delay.
pub const PROCESSING_DURATION: Duration = Duration::from_millis(2_000);
pub const ACTIVE_DURATION: Duration = Duration::from_millis(1_500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndicatorPhase {
    Hidden,
    Processing,
    Active,
}

impl IndicatorPhase {
    /// Phase an indicator created `elapsed` ago is in.
    pub fn at(elapsed: Duration) -> Self {
        if elapsed < PROCESSING_DURATION {
            IndicatorPhase::Processing
        } else if elapsed < PROCESSING_DURATION + ACTIVE_DURATION {
            IndicatorPhase::Active
        } else {
            IndicatorPhase::Hidden
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            IndicatorPhase::Hidden => None,
            IndicatorPhase::Processing => Some("Processing Image Quality..."),
            IndicatorPhase::Active => Some("High Quality Images Active"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

/// Page-side half of the message protocol for one loaded page.
///
/// Rendering is left to the host page; this tracks what should be shown.
#[derive(Debug)]
pub struct PageAgent {
    location: String,
    indicator_since: Option<Instant>,
    indicators_shown: usize,
    last_notification: Option<Notification>,
}

impl PageAgent {
    /// Loads the agent for `location` and raises the indicator if the page
    /// is a satellite view.
    pub fn load(location: impl Into<String>) -> Self {
        let mut agent = Self {
            location: location.into(),
            indicator_since: None,
            indicators_shown: 0,
            last_notification: None,
        };
        agent.create_status_indicator();
        agent
    }

    pub fn is_satellite_view(&self) -> bool {
        self.location.contains(MAPS_URL_MARKER) && self.location.contains(SATELLITE_MARKER)
    }

    pub fn status(&self) -> PageStatus {
        PageStatus {
            is_satellite_view: self.is_satellite_view(),
            has_gl_parameter: has_region_param(&self.location, DEFAULT_REGION_CODE),
            current_url: self.location.clone(),
        }
    }

    /// Creates the indicator at most once per page load.
    pub fn create_status_indicator(&mut self) -> bool {
        if self.indicator_since.is_some() || !self.is_satellite_view() {
            return false;
        }
        self.indicator_since = Some(Instant::now());
        self.indicators_shown += 1;
        debug!(url = %self.location, "status indicator created");
        true
    }

    /// Where the indicator of this page load is on its timeline.
    pub fn indicator_phase(&self) -> IndicatorPhase {
        match self.indicator_since {
            Some(since) => IndicatorPhase::at(since.elapsed()),
            None => IndicatorPhase::Hidden,
        }
    }

    pub fn indicator_label(&self) -> Option<&'static str> {
        self.indicator_phase().label()
    }

    pub fn reset_status_indicator(&mut self) -> ResetResponse {
        self.indicator_since = None;
        self.create_status_indicator();
        ResetResponse { success: true }
    }

    pub fn show_notification(&mut self, message: String, kind: NotificationKind) {
        info!(?kind, %message, "page notification");
        self.last_notification = Some(Notification { message, kind });
    }

    /// Page unload: the next load may raise a fresh indicator.
    pub fn unload(&mut self) {
        self.indicator_since = None;
    }

    pub fn navigate(&mut self, location: impl Into<String>) {
        self.unload();
        self.location = location.into();
        self.create_status_indicator();
    }

    pub fn indicators_shown(&self) -> usize {
        self.indicators_shown
    }

    pub fn last_notification(&self) -> Option<&Notification> {
        self.last_notification.as_ref()
    }

    pub fn handle_message(&mut self, message: ExtensionMessage) -> AppResult<Option<Value>> {
        let response = match message {
            ExtensionMessage::GetPageStatus => serde_json::to_value(self.status())?,
            ExtensionMessage::ResetStatusIndicator => {
                serde_json::to_value(self.reset_status_indicator())?
            }
            ExtensionMessage::ShowNotification { message, kind } => {
                self.show_notification(message, kind);
                return Ok(None);
            }
            ExtensionMessage::FixCurrentUrl | ExtensionMessage::GetCoordinatorStatus => {
                return Ok(None)
            }
        };
        Ok(Some(response))
    }
}
