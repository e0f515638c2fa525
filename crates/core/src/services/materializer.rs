//! Daily occurrence materialization.

use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;
use tracing::{info, warn};
use wakeup_common::{AppResult, IdGenerator};

use super::clock::Clock;
use super::occurrence_store::{OccurrenceStore, new_occurrence};

/// Counts from one materialization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationSummary {
    pub created_count: u64,
    pub skipped_count: u64,
    pub failed_count: u64,
}

impl MaterializationSummary {
    /// Whether some alarm could not be materialized and the run should be retried.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}

/// Creates today's occurrence for every alarm repeating on today's weekday.
#[derive(Clone)]
pub struct OccurrenceMaterializer {
    store: Arc<dyn OccurrenceStore>,
    clock: Arc<dyn Clock>,
    id_gen: IdGenerator,
}

impl OccurrenceMaterializer {
    #[must_use]
    pub fn new(store: Arc<dyn OccurrenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            id_gen: IdGenerator::new(),
        }
    }

    /// Materialize occurrences for the server's today.
    ///
    /// Safe to re-run: alarms that already have an occurrence today are
    /// skipped. A failing alarm is counted and does not stop the loop; only
    /// failure to list alarms aborts the run.
    pub async fn materialize_today(&self) -> AppResult<MaterializationSummary> {
        let now = self.clock.now();
        let today = now.date();

        let alarms = self.store.find_alarms_by_weekday(today.weekday()).await?;
        let existing = self.store.find_alarm_ids_with_occurrence(today).await?;

        let mut summary = MaterializationSummary::default();
        for alarm in &alarms {
            if existing.contains(&alarm.id) {
                summary.skipped_count += 1;
                continue;
            }

            let occurrence = new_occurrence(self.id_gen.generate(), alarm, today, now);
            match self.store.insert_occurrence_if_absent(occurrence).await {
                Ok(Some(_)) => summary.created_count += 1,
                Ok(None) => summary.skipped_count += 1,
                Err(e) => {
                    warn!(alarm_id = %alarm.id, error = %e, "Failed to materialize occurrence");
                    summary.failed_count += 1;
                }
            }
        }

        info!(
            date = %today,
            alarms = alarms.len(),
            created = summary.created_count,
            skipped = summary.skipped_count,
            failed = summary.failed_count,
            "Occurrence materialization finished"
        );
        Ok(summary)
    }
}
