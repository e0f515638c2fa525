//! Application configuration.

use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Alarm domain configuration.
    #[serde(default)]
    pub alarm: AlarmConfig,
    /// Push gateway configuration.
    pub push: PushConfig,
    /// Periodic job configuration.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Alarm domain configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    /// IANA timezone that defines the server's "today" and "now".
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl AlarmConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, crate::AppError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| crate::AppError::Config(format!("invalid alarm.timezone: {e}")))
    }
}

/// Push gateway (FCM HTTP v1) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Firebase project id.
    pub project_id: String,
    /// OAuth2 bearer token used for the FCM HTTP v1 API.
    ///
    /// Google access tokens expire after about an hour, so a fixed value only
    /// suits short runs. Long-running deployments set `access_token_file`.
    #[serde(default)]
    pub access_token: String,
    /// File holding the current bearer token, kept fresh by an external
    /// refresher. Read again for every batch and preferred over
    /// `access_token` when set.
    #[serde(default)]
    pub access_token_file: Option<String>,
    /// Base URL of the FCM API.
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
    /// Android time-to-live in seconds.
    #[serde(default = "default_android_ttl_secs")]
    pub android_ttl_secs: u64,
    /// APNs expiration window in seconds, added to the send time.
    #[serde(default = "default_apns_expiration_secs")]
    pub apns_expiration_secs: i64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

/// Periodic job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Interval of the ringing check in seconds.
    #[serde(default = "default_ringing_interval_secs")]
    pub ringing_interval_secs: u64,
    /// How far back an unrung occurrence may still start ringing, in seconds.
    #[serde(default = "default_ringing_grace_secs")]
    pub ringing_grace_secs: u64,
    /// Interval of the pre-alert sweep in seconds.
    #[serde(default = "default_pre_alert_interval_secs")]
    pub pre_alert_interval_secs: u64,
    /// How long before the alarm the pre-alert is sent, in minutes.
    #[serde(default = "default_pre_alert_lead_minutes")]
    pub pre_alert_lead_minutes: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            ringing_interval_secs: default_ringing_interval_secs(),
            ringing_grace_secs: default_ringing_grace_secs(),
            pre_alert_interval_secs: default_pre_alert_interval_secs(),
            pre_alert_lead_minutes: default_pre_alert_lead_minutes(),
        }
    }
}

impl SchedulerSettings {
    /// Ringing check interval.
    #[must_use]
    pub const fn ringing_interval(&self) -> Duration {
        Duration::from_secs(self.ringing_interval_secs)
    }

    /// Pre-alert sweep interval.
    #[must_use]
    pub const fn pre_alert_interval(&self) -> Duration {
        Duration::from_secs(self.pre_alert_interval_secs)
    }

    /// Reject settings the periodic jobs cannot run with.
    ///
    /// A zero interval would make the tick timers panic, and a zero sweep
    /// interval also leaves the pre-alert window empty.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.ringing_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "scheduler.ringing_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.pre_alert_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "scheduler.pre_alert_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.pre_alert_lead_minutes < 0 {
            return Err(config::ConfigError::Message(
                "scheduler.pre_alert_lead_minutes must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "wakeup".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com".to_string()
}

const fn default_android_ttl_secs() -> u64 {
    300
}

const fn default_apns_expiration_secs() -> i64 {
    300
}

const fn default_push_timeout_secs() -> u64 {
    10
}

const fn default_ringing_interval_secs() -> u64 {
    10
}

const fn default_ringing_grace_secs() -> u64 {
    300
}

const fn default_pre_alert_interval_secs() -> u64 {
    60
}

const fn default_pre_alert_lead_minutes() -> i64 {
    60
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `WAKEUP_ENV`)
    /// 4. Environment variables with `WAKEUP_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("WAKEUP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("WAKEUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::validated(config.try_deserialize()?)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("WAKEUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::validated(config.try_deserialize()?)
    }

    fn validated(config: Self) -> Result<Self, config::ConfigError> {
        config.scheduler.validate()?;
        Ok(config)
    }
}
