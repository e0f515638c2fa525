//! Scheduled jobs for the alarm lifecycle.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDateTime, NaiveTime};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use wakeup_common::AppResult;
use wakeup_common::config::SchedulerSettings;
use wakeup_core::{Clock, MaterializationSummary};

use crate::retry::{RetryConfig, RetryOutcome, spawn_with_retry};

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    /// Create today's occurrences (daily, at local midnight).
    MaterializeOccurrences,
    /// Start ringing due occurrences.
    CheckRinging,
    /// Send the ahead-of-time push.
    SendPreAlerts,
}

impl ScheduledJob {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MaterializeOccurrences => "materialize_occurrences",
            Self::CheckRinging => "check_ringing",
            Self::SendPreAlerts => "send_pre_alerts",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for the ringing check (default: 10 seconds).
    pub ringing_interval: Duration,
    /// Interval for the pre-alert sweep (default: 1 minute).
    pub pre_alert_interval: Duration,
    /// Retry policy of the daily materialization.
    pub materialization_retry: RetryConfig,
    /// Also materialize once at startup, covering a restart mid-day.
    pub materialize_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ringing_interval: Duration::from_secs(10),
            pre_alert_interval: Duration::from_secs(60),
            materialization_retry: RetryConfig::default(),
            materialize_on_startup: true,
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            ringing_interval: settings.ringing_interval(),
            pre_alert_interval: settings.pre_alert_interval(),
            ..Self::default()
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Create today's occurrences.
    async fn materialize_occurrences(&self) -> AppResult<MaterializationSummary>;

    /// Start ringing due occurrences; returns how many started.
    async fn check_ringing(&self) -> AppResult<u64>;

    /// Send pre-alerts; returns how many occurrences were marked.
    async fn send_pre_alerts(&self) -> AppResult<u64>;
}

/// Start the materialization with retries on a background task.
///
/// Returns as soon as the task is spawned.
pub fn trigger_materialization<E: JobExecutor + 'static>(
    executor: Arc<E>,
    retry: RetryConfig,
) -> JoinHandle<RetryOutcome<MaterializationSummary>> {
    spawn_with_retry(retry, ScheduledJob::MaterializeOccurrences.name(), move |attempt| {
        let executor = executor.clone();
        async move {
            tracing::debug!(attempt, "Materializing occurrences");
            executor.materialize_occurrences().await
        }
    })
}

/// Time left until the next local midnight after `now`.
#[must_use]
pub fn until_next_midnight(now: NaiveDateTime) -> Duration {
    let next = (now.date() + Days::new(1)).and_time(NaiveTime::MIN);
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run the scheduler with the given configuration and executor.
///
/// Returns the handles of the spawned loops so the caller can abort them on
/// shutdown.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
    clock: Arc<dyn Clock>,
) -> Vec<JoinHandle<()>> {
    let executor_daily = executor.clone();
    let executor_ringing = executor.clone();
    let executor_pre_alert = executor;

    let retry = config.materialization_retry;
    let materialize_on_startup = config.materialize_on_startup;
    let ringing_interval = config.ringing_interval;
    let pre_alert_interval = config.pre_alert_interval;

    let mut handles = Vec::with_capacity(3);

    // Spawn daily materialization task
    handles.push(tokio::spawn(async move {
        if materialize_on_startup {
            trigger_materialization(executor_daily.clone(), retry);
        }
        loop {
            let wait = until_next_midnight(clock.now());
            tracing::debug!(wait_secs = wait.as_secs(), "Next materialization scheduled");
            tokio::time::sleep(wait).await;
            trigger_materialization(executor_daily.clone(), retry);
            // Step past midnight so the next wait is a full day.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }));

    // Spawn ringing check task
    handles.push(tokio::spawn(async move {
        let mut interval = interval(ringing_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match executor_ringing.check_ringing().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "Occurrences started ringing");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Ringing check failed");
                }
            }
        }
    }));

    // Spawn pre-alert sweep task
    handles.push(tokio::spawn(async move {
        let mut interval = interval(pre_alert_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match executor_pre_alert.send_pre_alerts().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "Sent pre-alerts");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pre-alert sweep failed");
                }
            }
        }
    }));

    handles
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.ringing_interval, Duration::from_secs(10));
        assert_eq!(config.pre_alert_interval, Duration::from_secs(60));
        assert_eq!(config.materialization_retry, RetryConfig::default());
        assert!(config.materialize_on_startup);
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let settings = SchedulerSettings {
            ringing_interval_secs: 5,
            ..SchedulerSettings::default()
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.ringing_interval, Duration::from_secs(5));
        assert_eq!(config.pre_alert_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_until_next_midnight() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(
            until_next_midnight(date.and_hms_opt(23, 0, 0).unwrap()),
            Duration::from_secs(3600)
        );
        assert_eq!(
            until_next_midnight(date.and_hms_opt(0, 0, 0).unwrap()),
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_job_names() {
        assert_eq!(ScheduledJob::CheckRinging.name(), "check_ringing");
        assert_eq!(
            ScheduledJob::MaterializeOccurrences.name(),
            "materialize_occurrences"
        );
    }
}
