//! Wakeup alarm backend entry point.
//!
//! Runs the periodic alarm jobs: daily occurrence materialization, the
//! ringing check and the pre-alert sweep.

use std::sync::Arc;

use anyhow::Context;
use fred::prelude::*;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wakeup_common::Config;
use wakeup_core::{
    Clock, FcmGateway, NotificationDispatcher, OccurrenceMaterializer, RedisDeviceTokenStore,
    RingingService, RingingWindows, SeaOrmOccurrenceStore, SystemClock,
};
use wakeup_queue::{AlarmJobExecutor, SchedulerConfig, run_scheduler};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res.context("failed to listen for Ctrl+C")?;
                info!("Received SIGINT, shutting down...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wakeup=debug,sqlx=warn".into()),
        )
        .init();

    info!("Starting wakeup alarm backend...");

    let config = Config::load().context("failed to load configuration")?;
    let tz = config.alarm.tz()?;
    info!(timezone = %tz, "Loaded configuration");

    // Connect to database
    let db = wakeup_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    wakeup_db::migrate(&db).await?;
    info!("Migrations completed");
    let db = Arc::new(db);

    // Connect to Redis for device push addresses
    let redis_config = fred::types::config::Config::from_url(&config.redis.url)
        .context("failed to parse Redis URL")?;
    let redis = fred::clients::Client::new(redis_config, None, None, None);
    redis.connect();
    redis
        .wait_for_connect()
        .await
        .context("failed to connect to Redis")?;
    let redis = Arc::new(redis);
    info!("Connected to Redis");

    // Wire services
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(tz));
    let store = Arc::new(SeaOrmOccurrenceStore::new(db));
    let tokens = Arc::new(RedisDeviceTokenStore::new(redis.clone(), config.redis.prefix.clone()));
    let gateway = Arc::new(FcmGateway::new(&config.push)?);
    let dispatcher = NotificationDispatcher::new(tokens.clone(), gateway, &config.push);

    let materializer = OccurrenceMaterializer::new(store.clone(), clock.clone());
    let ringing = RingingService::new(
        store,
        tokens,
        dispatcher,
        clock.clone(),
        RingingWindows::from(&config.scheduler),
    );
    let executor = Arc::new(AlarmJobExecutor::new(materializer, ringing));

    let scheduler_config = SchedulerConfig::from(&config.scheduler);
    info!(
        ringing_interval_secs = scheduler_config.ringing_interval.as_secs(),
        pre_alert_interval_secs = scheduler_config.pre_alert_interval.as_secs(),
        "Starting scheduler"
    );
    let handles = run_scheduler(scheduler_config, executor, clock);

    let result = shutdown_signal().await;

    for handle in handles {
        handle.abort();
    }
    if let Err(e) = redis.quit().await {
        tracing::warn!(error = %e, "Failed to close Redis connection");
    }
    info!("Shutdown complete");

    result
}
