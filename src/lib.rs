pub mod browser;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod host;
pub mod page;
pub mod protocol;
pub mod rewriter;
pub mod tracker;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use browser::{TabHost, TabId, TabInfo};
pub use classifier::is_satellite_view;
pub use commands::FixFailure;
pub use config::{AppConfig, PublicAppConfig};
pub use coordinator::{Coordinator, RewriteOutcome, SkipReason};
pub use errors::{AppError, AppResult};
pub use host::NativeHost;
pub use page::PageAgent;
pub use protocol::{BrowserSignal, ExtensionMessage, FixResponse, PageStatus};
pub use rewriter::{add_region_param, add_region_param_for};
pub use tracker::FixTracker;

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,gmaps_quality_fix=debug"));
        // stdout carries native messaging frames
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}

/// Runs the native messaging host on stdio until the browser disconnects.
pub async fn run() -> AppResult<()> {
    init_tracing();
    let config = AppConfig::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        region = %config.region_code,
        delay_ms = config.rewrite_delay_ms,
        "starting satellite quality host"
    );
    NativeHost::new(config)
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
}
