//! Background jobs for the wakeup alarm backend.
//!
//! - **Scheduler**: daily occurrence materialization at local midnight,
//!   the ringing check and the pre-alert sweep
//! - **Retry**: fixed-delay retry for the daily batch, run off the
//!   triggering task
//! - **Executor**: wires the jobs to the core services

pub mod executor;
pub mod retry;
pub mod scheduler;

pub use executor::AlarmJobExecutor;
pub use retry::{RetryConfig, RetryOutcome, Retryable, run_with_retry, spawn_with_retry};
pub use scheduler::{
    JobExecutor, ScheduledJob, SchedulerConfig, run_scheduler, trigger_materialization,
    until_next_midnight,
};
