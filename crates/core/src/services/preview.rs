//! Read-only alarm preview: toggle state and the next two terms.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use serde::Serialize;
use wakeup_common::{AppError, AppResult};
use wakeup_db::entities::alarm::{self, WEEK, weekday_code};
use wakeup_db::entities::alarm_occurrence::DeactivateType;

use super::calendar::{next_occurrence_date, week_bounds, weekday_name};
use super::clock::Clock;
use super::deactivation::WEEKLY_OFF_LIMIT;
use super::occurrence_store::OccurrenceStore;

/// Alarm as shown on the member's alarm list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPreview {
    pub alarm_id: String,
    pub purpose: String,
    pub time: NaiveTime,
    /// Weekday codes in calendar order, e.g. `["MON", "WED"]`.
    pub repeat_days: Vec<String>,
    pub sound_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    /// `false` only while the current term was manually turned off.
    pub toggle_on: bool,
    pub first_upcoming_date: NaiveDate,
    pub first_upcoming_weekday: String,
    pub second_upcoming_date: NaiveDate,
    pub second_upcoming_weekday: String,
    pub remaining_off_count: u64,
}

#[derive(Clone)]
pub struct PreviewService {
    store: Arc<dyn OccurrenceStore>,
    clock: Arc<dyn Clock>,
}

impl PreviewService {
    #[must_use]
    pub fn new(store: Arc<dyn OccurrenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Preview relative to the server's today.
    pub async fn preview(&self, alarm_id: &str, member_id: &str) -> AppResult<AlarmPreview> {
        self.preview_on(alarm_id, member_id, self.clock.today()).await
    }

    /// Preview relative to `today`.
    pub async fn preview_on(
        &self,
        alarm_id: &str,
        member_id: &str,
        today: NaiveDate,
    ) -> AppResult<AlarmPreview> {
        let alarm = self
            .store
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| AppError::AlarmNotFound(alarm_id.to_string()))?;
        if alarm.member_id != member_id {
            return Err(AppError::PermissionDenied(format!(
                "alarm {alarm_id} is not owned by member {member_id}"
            )));
        }

        let repeat_days = alarm.repeat_weekdays();
        let d1 = next_occurrence_date(&repeat_days, today)?;
        let d2 = next_occurrence_date(&repeat_days, d1 + Days::new(1))?;
        let d3 = next_occurrence_date(&repeat_days, d2 + Days::new(1))?;

        let recent = self.store.find_latest_deactivated(alarm_id).await?;
        let is_current_deactivated = recent.as_ref().is_some_and(|o| o.date == d1);
        let is_off = recent
            .as_ref()
            .is_some_and(|o| o.deactivate_type == DeactivateType::Off);
        let toggle_on = !(is_current_deactivated && is_off);

        let (first, second) = if is_current_deactivated {
            (d2, d3)
        } else {
            (d1, d2)
        };

        let (week_from, week_to) = week_bounds(today);
        let used = self
            .store
            .count_off_logs(alarm_id, member_id, week_from, week_to)
            .await?;

        Ok(build_preview(
            alarm,
            toggle_on,
            first,
            second,
            WEEKLY_OFF_LIMIT.saturating_sub(used),
        ))
    }
}

fn build_preview(
    alarm: alarm::Model,
    toggle_on: bool,
    first: NaiveDate,
    second: NaiveDate,
    remaining_off_count: u64,
) -> AlarmPreview {
    let days = alarm.repeat_weekdays();
    let repeat_days = WEEK
        .iter()
        .filter(|d| days.contains(*d))
        .map(|d| weekday_code(*d).to_string())
        .collect();

    AlarmPreview {
        alarm_id: alarm.id,
        purpose: alarm.purpose,
        time: alarm.time,
        repeat_days,
        sound_type: alarm.sound_type,
        latitude: alarm.latitude,
        longitude: alarm.longitude,
        address: alarm.address,
        toggle_on,
        first_upcoming_date: first,
        first_upcoming_weekday: weekday_name(first.weekday()).to_string(),
        second_upcoming_date: second,
        second_upcoming_weekday: weekday_name(second.weekday()).to_string(),
        remaining_off_count,
    }
}
