//! Turning an upcoming alarm occurrence off.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};
use wakeup_common::{AppError, AppResult, IdGenerator};
use wakeup_db::entities::alarm_occurrence::{self, DeactivateType};

use super::calendar::{next_occurrence_date, week_bounds, weekday_name};
use super::clock::Clock;
use super::occurrence_store::{OccurrenceStore, new_occurrence};

/// Manual OFFs allowed per (alarm, member) per ISO week.
pub const WEEKLY_OFF_LIMIT: u64 = 2;

/// Result of a successful OFF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffResult {
    pub off_target_date: NaiveDate,
    pub off_target_weekday: String,
    pub reactivate_date: NaiveDate,
    pub reactivate_weekday: String,
    pub remaining_off_count: u64,
}

/// Handles a member's request to skip the next term of an alarm.
#[derive(Clone)]
pub struct DeactivationService {
    store: Arc<dyn OccurrenceStore>,
    clock: Arc<dyn Clock>,
    id_gen: IdGenerator,
}

impl DeactivationService {
    #[must_use]
    pub fn new(store: Arc<dyn OccurrenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            id_gen: IdGenerator::new(),
        }
    }

    /// Turn off the term of `alarm_id` the member is currently facing.
    ///
    /// If today's occurrence already rang the next term is targeted instead.
    /// A missing occurrence row, the OFF marker and the weekly off log are
    /// written together or not at all.
    pub async fn turn_off(
        &self,
        member_id: &str,
        alarm_id: &str,
        client_now: NaiveDateTime,
    ) -> AppResult<OffResult> {
        let server_now = self.clock.now();
        let client_date = client_now.date();
        if client_date != server_now.date() {
            return Err(AppError::InvalidClientDate {
                client: client_date,
                server: server_now.date(),
            });
        }

        let alarm = self
            .store
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| AppError::AlarmNotFound(alarm_id.to_string()))?;
        self.store
            .find_member(member_id)
            .await?
            .ok_or_else(|| AppError::MemberNotFound(member_id.to_string()))?;
        if alarm.member_id != member_id {
            return Err(AppError::PermissionDenied(format!(
                "alarm {alarm_id} is not owned by member {member_id}"
            )));
        }

        let (week_from, week_to) = week_bounds(client_date);
        let used = self
            .store
            .count_off_logs(alarm_id, member_id, week_from, week_to)
            .await?;
        if used >= WEEKLY_OFF_LIMIT {
            return Err(AppError::AlarmOffLimitExceeded);
        }

        let repeat_days = alarm.repeat_weekdays();
        let todays = self.store.find_occurrence(alarm_id, client_date).await?;
        let search_from = if todays
            .as_ref()
            .is_some_and(|o| is_after_ringing(o, client_now))
        {
            client_date + Days::new(1)
        } else {
            client_date
        };
        let off_target_date = next_occurrence_date(&repeat_days, search_from)?;

        let existing = if off_target_date == client_date {
            todays
        } else {
            self.store.find_occurrence(alarm_id, off_target_date).await?
        };
        if existing
            .as_ref()
            .is_some_and(|o| o.deactivate_type != DeactivateType::None)
        {
            return Err(AppError::AlreadyDeactivated);
        }

        // An absent row is created by the OFF write itself, never on its own.
        let target = existing.unwrap_or_else(|| {
            new_occurrence(self.id_gen.generate(), &alarm, off_target_date, server_now)
        });
        let target_id = target.id.clone();
        if !self.store.turn_off(target, member_id, server_now).await? {
            debug!(occurrence_id = %target_id, "Occurrence deactivated concurrently");
            return Err(AppError::AlreadyDeactivated);
        }

        let reactivate_date = off_target_date + Days::new(1);
        let remaining_off_count = WEEKLY_OFF_LIMIT - used - 1;

        info!(
            alarm_id = %alarm_id,
            member_id = %member_id,
            off_target_date = %off_target_date,
            remaining_off_count,
            "Alarm occurrence turned off"
        );

        Ok(OffResult {
            off_target_date,
            off_target_weekday: weekday_name(off_target_date.weekday()).to_string(),
            reactivate_date,
            reactivate_weekday: weekday_name(reactivate_date.weekday()).to_string(),
            remaining_off_count,
        })
    }
}

/// Whether today's occurrence counts as already past.
///
/// Kept exactly as the product defined it: ringing, past its time, and
/// already carrying a deactivation marker. A marker other than `NONE` makes
/// the occurrence terminal anyway, so this only changes which date gets
/// targeted. Pending product clarification.
fn is_after_ringing(occurrence: &alarm_occurrence::Model, client_now: NaiveDateTime) -> bool {
    occurrence.is_ringing
        && client_now > occurrence.rings_at()
        && occurrence.deactivate_type != DeactivateType::None
}
