use anyhow::Context;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::signals::SIGNALS_API_BASE;
use crate::api::smartapi::SMARTAPI_BASE_URL;
use crate::api::symbol_master::{SCRIP_MASTER_FILE, SCRIP_MASTER_URL};
use crate::api::SmartApiCredentials;
use crate::fetcher::RetryPolicy;
use crate::strategy::LongSetupRules;

const ENV_PREFIX: &str = "SWINGSCAN";
const DEFAULT_CONFIG_NAME: &str = "swingscan";

/// Application settings
///
/// Read from `swingscan.toml` (optional) and `SWINGSCAN_*` environment
/// variables, nested keys separated by `__`, e.g.
/// `SWINGSCAN_SMARTAPI__CLIENT_ID` or `SWINGSCAN_RETRY__MAX_ATTEMPTS`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub smartapi: SmartApiSettings,
    #[serde(default)]
    pub symbol_master: SymbolMasterSettings,
    #[serde(default)]
    pub signals: SignalSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub rules: LongSetupRules,
}

impl Settings {
    /// Load settings, reading `.env` first
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[derive(Clone, Deserialize)]
pub struct SmartApiSettings {
    #[serde(default = "default_smartapi_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub client_id: String,
    pub password: String,
    pub totp_secret: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmartApiSettings {
    pub fn credentials(&self) -> SmartApiCredentials {
        SmartApiCredentials {
            api_key: SecretString::new(self.api_key.clone().into()),
            client_id: self.client_id.clone(),
            password: SecretString::new(self.password.clone().into()),
            totp_secret: SecretString::new(self.totp_secret.clone().into()),
        }
    }
}

// Keep credentials out of logs
impl std::fmt::Debug for SmartApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartApiSettings")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("exchange", &self.exchange)
            .field("interval", &self.interval)
            .field("requests_per_second", &self.requests_per_second)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

fn default_smartapi_base_url() -> String {
    SMARTAPI_BASE_URL.to_string()
}

fn default_exchange() -> String {
    "NSE".to_string()
}

fn default_interval() -> String {
    "ONE_DAY".to_string()
}

fn default_requests_per_second() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SymbolMasterSettings {
    pub url: String,
    pub cache_path: PathBuf,
    pub max_age_hours: u64,
}

impl Default for SymbolMasterSettings {
    fn default() -> Self {
        Self {
            url: SCRIP_MASTER_URL.to_string(),
            cache_path: PathBuf::from(SCRIP_MASTER_FILE),
            max_age_hours: 24,
        }
    }
}

impl SymbolMasterSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub base_url: String,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            base_url: SIGNALS_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub lookback_days: i64,         // Indicator warm-up window before the signal
    pub inter_candidate_delay_ms: u64, // On top of any retry back-off
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            lookback_days: 60,
            inter_candidate_delay_ms: 1000,
        }
    }
}

impl BatchSettings {
    pub fn inter_candidate_delay(&self) -> Duration {
        Duration::from_millis(self.inter_candidate_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub rate_limit_delay_ms: u64,
    pub invalid_identifier_delay_ms: u64,
    pub transport_delay_ms: u64,
    pub relogin_on_attempt: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_delay_ms: 5000,
            invalid_identifier_delay_ms: 2000,
            transport_delay_ms: 2000,
            relogin_on_attempt: 3,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: s.max_attempts,
            rate_limit_delay: Duration::from_millis(s.rate_limit_delay_ms),
            invalid_identifier_delay: Duration::from_millis(s.invalid_identifier_delay_ms),
            transport_delay: Duration::from_millis(s.transport_delay_ms),
            relogin_on_attempt: s.relogin_on_attempt,
        }
    }
}
