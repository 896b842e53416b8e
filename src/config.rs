use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_REGION_CODE: &str = "es";
const DEFAULT_REWRITE_DELAY_MS: u64 = 2_000;
const DEFAULT_PROCESSED_URL_CAPACITY: usize = 1_000;
const DEFAULT_BROWSER_CALL_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub region_code: String,
    pub rewrite_delay_ms: u64,
    pub processed_url_capacity: usize,
    pub browser_call_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAppConfig {
    pub region_code: String,
    pub rewrite_delay_ms: u64,
    pub processed_url_capacity: usize,
    pub browser_call_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            region_code: DEFAULT_REGION_CODE.to_string(),
            rewrite_delay_ms: DEFAULT_REWRITE_DELAY_MS,
            processed_url_capacity: DEFAULT_PROCESSED_URL_CAPACITY,
            browser_call_timeout_ms: DEFAULT_BROWSER_CALL_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            region_code: parse_region("REGION_CODE"),
            rewrite_delay_ms: parse_u64("REWRITE_DELAY_MS", DEFAULT_REWRITE_DELAY_MS),
            processed_url_capacity: parse_usize(
                "PROCESSED_URL_CAPACITY",
                DEFAULT_PROCESSED_URL_CAPACITY,
            )
            .max(1),
            browser_call_timeout_ms: parse_u64(
                "BROWSER_CALL_TIMEOUT_MS",
                DEFAULT_BROWSER_CALL_TIMEOUT_MS,
            ),
        }
    }

    pub fn rewrite_delay(&self) -> Duration {
        Duration::from_millis(self.rewrite_delay_ms)
    }

    pub fn browser_call_timeout(&self) -> Duration {
        Duration::from_millis(self.browser_call_timeout_ms.max(1))
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            region_code: self.region_code.clone(),
            rewrite_delay_ms: self.rewrite_delay_ms,
            processed_url_capacity: self.processed_url_capacity,
            browser_call_timeout_ms: self.browser_call_timeout_ms,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_region(key: &str) -> String {
    match env::var(key) {
        Ok(value) => {
            let value = value.trim().to_ascii_lowercase();
            if value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic()) {
                value
            } else {
                warn!(region = %value, "ignoring invalid region code");
                DEFAULT_REGION_CODE.to_string()
            }
        }
        Err(_) => DEFAULT_REGION_CODE.to_string(),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
