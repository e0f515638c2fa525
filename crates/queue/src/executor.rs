//! Job executor backed by the core alarm services.

use async_trait::async_trait;
use wakeup_common::AppResult;
use wakeup_core::{MaterializationSummary, OccurrenceMaterializer, RingingService};

use crate::scheduler::JobExecutor;

/// Runs the scheduled alarm jobs against the core services.
#[derive(Clone)]
pub struct AlarmJobExecutor {
    materializer: OccurrenceMaterializer,
    ringing: RingingService,
}

impl AlarmJobExecutor {
    /// Create a new executor.
    #[must_use]
    pub const fn new(materializer: OccurrenceMaterializer, ringing: RingingService) -> Self {
        Self {
            materializer,
            ringing,
        }
    }
}

#[async_trait]
impl JobExecutor for AlarmJobExecutor {
    async fn materialize_occurrences(&self) -> AppResult<MaterializationSummary> {
        self.materializer.materialize_today().await
    }

    async fn check_ringing(&self) -> AppResult<u64> {
        self.ringing.check_ringing().await
    }

    async fn send_pre_alerts(&self) -> AppResult<u64> {
        self.ringing.send_pre_alerts().await
    }
}
