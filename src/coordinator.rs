use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{TabHost, TabId};
use crate::classifier::is_satellite_view;
use crate::config::AppConfig;
use crate::protocol::{BrowserSignal, WINDOW_ID_NONE};
use crate::rewriter::add_region_param_for;
use crate::tracker::FixTracker;

const TAB_STATUS_COMPLETE: &str = "complete";
const MAIN_FRAME_ID: i64 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteOutcome {
    NoAction(SkipReason),
    Scheduled { tab_id: TabId, url: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    MissingUrl,
    NotSatelliteView,
    TabAlreadyFixed,
    UrlAlreadyProcessed,
    AlreadyCorrect,
    IgnoredSignal,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingUrl => "missing_url",
            SkipReason::NotSatelliteView => "not_satellite_view",
            SkipReason::TabAlreadyFixed => "tab_already_fixed",
            SkipReason::UrlAlreadyProcessed => "url_already_processed",
            SkipReason::AlreadyCorrect => "already_correct",
            SkipReason::IgnoredSignal => "ignored_signal",
        }
    }
}

/// Drives classify → rewrite → track → navigate for every browser signal.
///
/// Gate checks and marking happen under a single lock acquisition with no
/// await in between, so two signals for the same navigation can never both
/// schedule a rewrite. The delayed navigation is a spawned task whose handle
/// is kept per tab and aborted when the tab closes.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) browser: Arc<dyn TabHost>,
    pub(crate) config: AppConfig,
    pub(crate) state: Arc<Mutex<CoordinatorState>>,
}

pub(crate) struct CoordinatorState {
    pub(crate) tracker: FixTracker,
    pub(crate) pending: HashMap<TabId, PendingRewrite>,
    next_ticket: u64,
}

pub(crate) struct PendingRewrite {
    ticket: u64,
    handle: JoinHandle<()>,
}

impl CoordinatorState {
    /// Aborts the rewrite still waiting for `tab_id`, if any.
    pub(crate) fn cancel_pending(&mut self, tab_id: TabId) -> bool {
        match self.pending.remove(&tab_id) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Coordinator {
    pub fn new(browser: Arc<dyn TabHost>, config: AppConfig) -> Self {
        let state = CoordinatorState {
            tracker: FixTracker::new(config.processed_url_capacity),
            pending: HashMap::new(),
            next_ticket: 0,
        };
        Self {
            browser,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn handle_signal(&self, signal: BrowserSignal) -> RewriteOutcome {
        match signal {
            BrowserSignal::NavigationCompleted {
                tab_id,
                frame_id,
                url,
            } => {
                if frame_id != MAIN_FRAME_ID {
                    return RewriteOutcome::NoAction(SkipReason::IgnoredSignal);
                }
                self.process_candidate(tab_id, Some(url.as_str()))
            }
            BrowserSignal::TabUpdated {
                tab_id,
                status,
                url,
            } => {
                if status.as_deref() != Some(TAB_STATUS_COMPLETE) {
                    return RewriteOutcome::NoAction(SkipReason::IgnoredSignal);
                }
                self.process_candidate(tab_id, url.as_deref())
            }
            BrowserSignal::TabActivated { tab_id } => match self.browser.get_tab(tab_id).await {
                Ok(Some(tab)) => self.process_candidate(tab.id, tab.url.as_deref()),
                Ok(None) => RewriteOutcome::NoAction(SkipReason::IgnoredSignal),
                Err(err) => {
                    warn!(?err, %tab_id, "failed to look up activated tab");
                    RewriteOutcome::NoAction(SkipReason::IgnoredSignal)
                }
            },
            BrowserSignal::WindowFocusChanged { window_id } if window_id == WINDOW_ID_NONE => {
                RewriteOutcome::NoAction(SkipReason::IgnoredSignal)
            }
            BrowserSignal::WindowFocusChanged { .. }
            | BrowserSignal::Startup
            | BrowserSignal::Installed => self.check_active_tab().await,
            BrowserSignal::TabRemoved { tab_id } => {
                self.forget_tab(tab_id);
                RewriteOutcome::NoAction(SkipReason::IgnoredSignal)
            }
        }
    }

    /// Runs the rewrite-once pipeline for one candidate URL. Spawns the
    /// delayed rewrite, so it must run inside a tokio runtime.
    pub(crate) fn process_candidate(&self, tab_id: TabId, url: Option<&str>) -> RewriteOutcome {
        let outcome = self.try_schedule(tab_id, url);
        match &outcome {
            RewriteOutcome::Scheduled { url: fixed, .. } => {
                info!(
                    %tab_id,
                    from = url.unwrap_or_default(),
                    to = %fixed,
                    delay_ms = self.config.rewrite_delay_ms,
                    "scheduled satellite url rewrite"
                );
            }
            RewriteOutcome::NoAction(reason) => {
                debug!(%tab_id, reason = reason.as_str(), "no rewrite needed");
            }
        }
        outcome
    }

    fn try_schedule(&self, tab_id: TabId, url: Option<&str>) -> RewriteOutcome {
        let url = match url {
            Some(url) if !url.is_empty() => url,
            _ => return RewriteOutcome::NoAction(SkipReason::MissingUrl),
        };
        if !is_satellite_view(url) {
            return RewriteOutcome::NoAction(SkipReason::NotSatelliteView);
        }

        let mut state = self.state.lock();
        if state.tracker.is_tab_fixed(tab_id) {
            return RewriteOutcome::NoAction(SkipReason::TabAlreadyFixed);
        }
        if state.tracker.is_url_processed(url) {
            return RewriteOutcome::NoAction(SkipReason::UrlAlreadyProcessed);
        }

        let fixed = match add_region_param_for(url, &self.config.region_code) {
            Some(fixed) if fixed != url => fixed,
            _ => return RewriteOutcome::NoAction(SkipReason::AlreadyCorrect),
        };

        // Mark before the delay: later signals for this navigation stop at the gates above.
        state.tracker.mark_tab_fixed(tab_id);
        state.tracker.mark_url_processed(url);

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let handle = self.spawn_rewrite(tab_id, fixed.clone(), ticket);
        if let Some(previous) = state.pending.insert(tab_id, PendingRewrite { ticket, handle }) {
            previous.handle.abort();
        }

        RewriteOutcome::Scheduled { tab_id, url: fixed }
    }

    fn spawn_rewrite(&self, tab_id: TabId, url: String, ticket: u64) -> JoinHandle<()> {
        let browser = Arc::clone(&self.browser);
        let state = Arc::clone(&self.state);
        let delay = self.config.rewrite_delay();
        tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut state = state.lock();
                if state.pending.get(&tab_id).map(|p| p.ticket) == Some(ticket) {
                    state.pending.remove(&tab_id);
                }
            }
            apply_rewrite(browser.as_ref(), tab_id, &url).await;
        })
    }

    async fn check_active_tab(&self) -> RewriteOutcome {
        match self.browser.active_tab().await {
            Ok(Some(tab)) => self.process_candidate(tab.id, tab.url.as_deref()),
            Ok(None) => RewriteOutcome::NoAction(SkipReason::IgnoredSignal),
            Err(err) => {
                warn!(?err, "failed to query active tab");
                RewriteOutcome::NoAction(SkipReason::IgnoredSignal)
            }
        }
    }

    /// Forgets a closed tab: cancels its pending rewrite and unmarks it.
    pub fn forget_tab(&self, tab_id: TabId) {
        let mut state = self.state.lock();
        if state.cancel_pending(tab_id) {
            debug!(%tab_id, "cancelled pending rewrite for closed tab");
        }
        state.tracker.unmark_tab(tab_id);
    }

    pub fn is_tab_fixed(&self, tab_id: TabId) -> bool {
        self.state.lock().tracker.is_tab_fixed(tab_id)
    }

    pub fn pending_rewrites(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn rewrite_delay(&self) -> Duration {
        self.config.rewrite_delay()
    }
}

async fn apply_rewrite(browser: &dyn TabHost, tab_id: TabId, url: &str) {
    match browser.get_tab(tab_id).await {
        Ok(Some(_)) => match browser.update_tab_url(tab_id, url).await {
            Ok(()) => info!(%tab_id, %url, "applied satellite url rewrite"),
            Err(err) => warn!(?err, %tab_id, "failed to update tab url"),
        },
        Ok(None) => debug!(%tab_id, "tab closed before rewrite fired"),
        Err(err) => debug!(?err, %tab_id, "tab lookup failed; abandoning rewrite"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::browser::TabInfo;
    use crate::errors::{AppError, AppResult};

    pub(crate) const SATELLITE: &str = "https://www.google.com/maps/@40.41,-3.70,500m/data=!3m1!1e3";
    pub(crate) const FIXED: &str = "https://www.google.com/maps/@40.41,-3.70,500m/data=!3m1!1e3?gl=es";

    #[derive(Default)]
    pub(crate) struct FakeBrowser {
        tabs: Mutex<HashMap<TabId, TabInfo>>,
        active: Mutex<Option<TabId>>,
        updates: Mutex<Vec<(TabId, String)>>,
        fail_updates: Mutex<bool>,
    }

    impl FakeBrowser {
        pub(crate) fn with_tab(self, id: i64, url: &str) -> Self {
            self.tabs.lock().insert(
                TabId(id),
                TabInfo {
                    id: TabId(id),
                    url: Some(url.to_string()),
                },
            );
            self
        }

        pub(crate) fn activate(self, id: i64) -> Self {
            *self.active.lock() = Some(TabId(id));
            self
        }

        pub(crate) fn close(&self, id: i64) {
            self.tabs.lock().remove(&TabId(id));
        }

        pub(crate) fn fail_updates(&self) {
            *self.fail_updates.lock() = true;
        }

        pub(crate) fn updates(&self) -> Vec<(TabId, String)> {
            self.updates.lock().clone()
        }
    }

    #[async_trait]
    impl TabHost for FakeBrowser {
        async fn active_tab(&self) -> AppResult<Option<TabInfo>> {
            let active = *self.active.lock();
            Ok(active.and_then(|id| self.tabs.lock().get(&id).cloned()))
        }

        async fn get_tab(&self, tab_id: TabId) -> AppResult<Option<TabInfo>> {
            Ok(self.tabs.lock().get(&tab_id).cloned())
        }

        async fn update_tab_url(&self, tab_id: TabId, url: &str) -> AppResult<()> {
            if *self.fail_updates.lock() {
                return Err(AppError::Browser("tab is gone".into()));
            }
            self.updates.lock().push((tab_id, url.to_string()));
            if let Some(tab) = self.tabs.lock().get_mut(&tab_id) {
                tab.url = Some(url.to_string());
            }
            Ok(())
        }
    }

    pub(crate) fn coordinator(browser: Arc<FakeBrowser>) -> Coordinator {
        Coordinator::new(browser, AppConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn rewrites_after_delay() {
        let browser = Arc::new(FakeBrowser::default().with_tab(1, SATELLITE));
        let coordinator = coordinator(browser.clone());

        let outcome = coordinator
            .handle_signal(BrowserSignal::NavigationCompleted {
                tab_id: TabId(1),
                frame_id: 0,
                url: SATELLITE.into(),
            })
            .await;
        assert_eq!(
            outcome,
            RewriteOutcome::Scheduled {
                tab_id: TabId(1),
                url: FIXED.into()
            }
        );
        assert_eq!(coordinator.pending_rewrites(), 1);

        sleep(Duration::from_millis(1_900)).await;
        assert!(browser.updates().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(browser.updates(), vec![(TabId(1), FIXED.to_string())]);
        assert_eq!(coordinator.pending_rewrites(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signals_for_same_tab_schedule_once() {
        let browser = Arc::new(FakeBrowser::default().with_tab(1, SATELLITE));
        let coordinator = coordinator(browser.clone());

        assert!(matches!(
            coordinator.process_candidate(TabId(1), Some(SATELLITE)),
            RewriteOutcome::Scheduled { .. }
        ));
        let second = coordinator
            .handle_signal(BrowserSignal::TabUpdated {
                tab_id: TabId(1),
                status: Some("complete".into()),
                url: Some(SATELLITE.into()),
            })
            .await;
        assert_eq!(second, RewriteOutcome::NoAction(SkipReason::TabAlreadyFixed));

        // later navigations in the same tab stay guarded
        sleep(Duration::from_secs(3)).await;
        let after = coordinator.process_candidate(
            TabId(1),
            Some("https://www.google.com/maps/@40.41,-3.70,600m/data=!3m1!1e3"),
        );
        assert_eq!(after, RewriteOutcome::NoAction(SkipReason::TabAlreadyFixed));
        assert_eq!(browser.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_url_on_another_tab_is_skipped() {
        let browser = Arc::new(
            FakeBrowser::default()
                .with_tab(1, SATELLITE)
                .with_tab(2, SATELLITE),
        );
        let coordinator = coordinator(browser.clone());

        coordinator.process_candidate(TabId(1), Some(SATELLITE));
        assert_eq!(
            coordinator.process_candidate(TabId(2), Some(SATELLITE)),
            RewriteOutcome::NoAction(SkipReason::UrlAlreadyProcessed)
        );
        assert!(!coordinator.is_tab_fixed(TabId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn skips_non_matching_and_already_fixed_urls() {
        let browser = Arc::new(FakeBrowser::default());
        let coordinator = coordinator(browser.clone());

        assert_eq!(
            coordinator.process_candidate(TabId(1), None),
            RewriteOutcome::NoAction(SkipReason::MissingUrl)
        );
        assert_eq!(
            coordinator.process_candidate(TabId(1), Some("https://example.com/maps/!3m1!1e3")),
            RewriteOutcome::NoAction(SkipReason::NotSatelliteView)
        );
        assert_eq!(
            coordinator.process_candidate(TabId(1), Some(FIXED)),
            RewriteOutcome::NoAction(SkipReason::AlreadyCorrect)
        );
        assert!(!coordinator.is_tab_fixed(TabId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_sub_frames_and_incomplete_updates() {
        let browser = Arc::new(FakeBrowser::default().with_tab(1, SATELLITE));
        let coordinator = coordinator(browser.clone());

        let sub_frame = coordinator
            .handle_signal(BrowserSignal::NavigationCompleted {
                tab_id: TabId(1),
                frame_id: 4,
                url: SATELLITE.into(),
            })
            .await;
        assert_eq!(sub_frame, RewriteOutcome::NoAction(SkipReason::IgnoredSignal));

        let loading = coordinator
            .handle_signal(BrowserSignal::TabUpdated {
                tab_id: TabId(1),
                status: Some("loading".into()),
                url: Some(SATELLITE.into()),
            })
            .await;
        assert_eq!(loading, RewriteOutcome::NoAction(SkipReason::IgnoredSignal));

        let unfocused = coordinator
            .handle_signal(BrowserSignal::WindowFocusChanged {
                window_id: WINDOW_ID_NONE,
            })
            .await;
        assert_eq!(unfocused, RewriteOutcome::NoAction(SkipReason::IgnoredSignal));
        assert!(!coordinator.is_tab_fixed(TabId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn activation_and_startup_check_the_tab() {
        let browser = Arc::new(
            FakeBrowser::default()
                .with_tab(1, SATELLITE)
                .with_tab(2, "https://www.google.com/maps/@1,2,3z/data=!3m1!1e3")
                .activate(2),
        );
        let coordinator = coordinator(browser.clone());

        let activated = coordinator
            .handle_signal(BrowserSignal::TabActivated { tab_id: TabId(1) })
            .await;
        assert!(matches!(
            activated,
            RewriteOutcome::Scheduled { tab_id: TabId(1), .. }
        ));

        let startup = coordinator.handle_signal(BrowserSignal::Startup).await;
        assert!(matches!(
            startup,
            RewriteOutcome::Scheduled { tab_id: TabId(2), .. }
        ));

        let focused = coordinator
            .handle_signal(BrowserSignal::WindowFocusChanged { window_id: 9 })
            .await;
        assert_eq!(focused, RewriteOutcome::NoAction(SkipReason::TabAlreadyFixed));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_tab_cancels_pending_rewrite() {
        let browser = Arc::new(FakeBrowser::default().with_tab(1, SATELLITE));
        let coordinator = coordinator(browser.clone());

        coordinator.process_candidate(TabId(1), Some(SATELLITE));
        sleep(Duration::from_millis(500)).await;
        browser.close(1);
        coordinator
            .handle_signal(BrowserSignal::TabRemoved { tab_id: TabId(1) })
            .await;

        assert_eq!(coordinator.pending_rewrites(), 0);
        assert!(!coordinator.is_tab_fixed(TabId(1)));
        sleep(Duration::from_secs(3)).await;
        assert!(browser.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_tab_is_skipped_at_fire_time() {
        let browser = Arc::new(FakeBrowser::default().with_tab(1, SATELLITE));
        let coordinator = coordinator(browser.clone());

        coordinator.process_candidate(TabId(1), Some(SATELLITE));
        browser.close(1);
        sleep(Duration::from_secs(3)).await;

        assert!(browser.updates().is_empty());
        // marking is optimistic: the tab stays fixed until its removal arrives
        assert!(coordinator.is_tab_fixed(TabId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn tab_removal_evicts_oversized_url_cache() {
        let browser = Arc::new(FakeBrowser::default());
        let coordinator = coordinator(browser.clone());
        {
            let mut state = coordinator.state.lock();
            for i in 0..=1000 {
                state
                    .tracker
                    .mark_url_processed(format!("https://www.google.com/maps/@{i},0,3z/data=!3m1!1e3"));
            }
        }

        coordinator
            .handle_signal(BrowserSignal::TabRemoved { tab_id: TabId(99) })
            .await;
        assert_eq!(coordinator.state.lock().tracker.processed_urls(), 0);
    }
}
