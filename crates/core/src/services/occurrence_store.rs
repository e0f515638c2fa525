//! Durable store contract for alarms, occurrences and off logs.
//!
//! The engine services only talk to [`OccurrenceStore`]; the sea-orm
//! implementation below delegates to the repositories in `wakeup-db`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use sea_orm::{DatabaseConnection, Set};
use wakeup_common::{AppResult, IdGenerator};
use wakeup_db::entities::alarm_occurrence::DeactivateType;
use wakeup_db::entities::{alarm, alarm_occurrence, alarm_off_log, member};
use wakeup_db::repositories::{
    AlarmOccurrenceRepository, AlarmOffLogRepository, AlarmRepository, MemberRepository,
};

/// Read/write contract the alarm engine needs from persistent storage.
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    async fn find_member(&self, member_id: &str) -> AppResult<Option<member::Model>>;

    async fn find_alarm(&self, alarm_id: &str) -> AppResult<Option<alarm::Model>>;

    async fn find_alarms_by_ids(&self, alarm_ids: &[String]) -> AppResult<Vec<alarm::Model>>;

    /// Alarms whose repeat set contains `day`.
    async fn find_alarms_by_weekday(&self, day: Weekday) -> AppResult<Vec<alarm::Model>>;

    /// Ids of alarms that already have an occurrence on `date`.
    async fn find_alarm_ids_with_occurrence(&self, date: NaiveDate) -> AppResult<HashSet<String>>;

    async fn find_occurrence(
        &self,
        alarm_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<alarm_occurrence::Model>>;

    /// Insert unless an occurrence for the same (alarm, date) exists.
    ///
    /// Returns `None` when the row already existed.
    async fn insert_occurrence_if_absent(
        &self,
        occurrence: alarm_occurrence::Model,
    ) -> AppResult<Option<alarm_occurrence::Model>>;

    /// Most recent OFF or CHECKIN occurrence, by (date desc, time desc).
    async fn find_latest_deactivated(
        &self,
        alarm_id: &str,
    ) -> AppResult<Option<alarm_occurrence::Model>>;

    /// Active, not yet ringing occurrences on `date` timed in `[from, to]`.
    async fn find_ring_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>>;

    /// Set the ringing flag and bump the ring counter. `false` if it was already set.
    async fn mark_ringing(&self, occurrence_id: &str) -> AppResult<bool>;

    /// Active, not yet pre-alerted occurrences on `date` timed in `[from, to)`.
    async fn find_pre_alert_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>>;

    async fn mark_pre_alert_sent(&self, occurrence_ids: &[String], at: NaiveDateTime) -> AppResult<u64>;

    /// Off logs of (alarm, member) created in `[from, to)`.
    async fn count_off_logs(
        &self,
        alarm_id: &str,
        member_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<u64>;

    /// Move the occurrence on `target`'s (alarm, date) from `NONE` to `OFF`
    /// and append an off log in one unit of work.
    ///
    /// `target` is inserted first if that (alarm, date) has no row yet, so an
    /// on-demand occurrence is never left behind by a failed OFF. Returns
    /// `false` without writing anything if the occurrence was no longer `NONE`.
    async fn turn_off(
        &self,
        target: alarm_occurrence::Model,
        member_id: &str,
        at: NaiveDateTime,
    ) -> AppResult<bool>;
}

/// Build a fresh, active occurrence of `alarm` on `date`.
#[must_use]
pub fn new_occurrence(
    id: String,
    alarm: &alarm::Model,
    date: NaiveDate,
    created_at: NaiveDateTime,
) -> alarm_occurrence::Model {
    alarm_occurrence::Model {
        id,
        alarm_id: alarm.id.clone(),
        date,
        time: alarm.time,
        deactivate_type: DeactivateType::None,
        deactivated_at: None,
        checked_in_at: None,
        is_ringing: false,
        ring_count: 0,
        pre_alert_sent_at: None,
        created_at,
    }
}

/// [`OccurrenceStore`] backed by PostgreSQL through sea-orm.
#[derive(Clone)]
pub struct SeaOrmOccurrenceStore {
    member_repo: MemberRepository,
    alarm_repo: AlarmRepository,
    occurrence_repo: AlarmOccurrenceRepository,
    off_log_repo: AlarmOffLogRepository,
    id_gen: IdGenerator,
}

impl SeaOrmOccurrenceStore {
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            member_repo: MemberRepository::new(Arc::clone(&db)),
            alarm_repo: AlarmRepository::new(Arc::clone(&db)),
            occurrence_repo: AlarmOccurrenceRepository::new(Arc::clone(&db)),
            off_log_repo: AlarmOffLogRepository::new(db),
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl OccurrenceStore for SeaOrmOccurrenceStore {
    async fn find_member(&self, member_id: &str) -> AppResult<Option<member::Model>> {
        self.member_repo.find_by_id(member_id).await
    }

    async fn find_alarm(&self, alarm_id: &str) -> AppResult<Option<alarm::Model>> {
        self.alarm_repo.find_by_id(alarm_id).await
    }

    async fn find_alarms_by_ids(&self, alarm_ids: &[String]) -> AppResult<Vec<alarm::Model>> {
        self.alarm_repo.find_by_ids(alarm_ids).await
    }

    async fn find_alarms_by_weekday(&self, day: Weekday) -> AppResult<Vec<alarm::Model>> {
        self.alarm_repo.find_by_repeat_day(day).await
    }

    async fn find_alarm_ids_with_occurrence(&self, date: NaiveDate) -> AppResult<HashSet<String>> {
        self.occurrence_repo.find_alarm_ids_on(date).await
    }

    async fn find_occurrence(
        &self,
        alarm_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        self.occurrence_repo.find_by_alarm_and_date(alarm_id, date).await
    }

    async fn insert_occurrence_if_absent(
        &self,
        occurrence: alarm_occurrence::Model,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        self.occurrence_repo.insert_if_absent(occurrence).await
    }

    async fn find_latest_deactivated(
        &self,
        alarm_id: &str,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        self.occurrence_repo.find_latest_deactivated(alarm_id).await
    }

    async fn find_ring_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        self.occurrence_repo.find_ring_candidates(date, from, to).await
    }

    async fn mark_ringing(&self, occurrence_id: &str) -> AppResult<bool> {
        self.occurrence_repo.mark_ringing(occurrence_id).await
    }

    async fn find_pre_alert_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        self.occurrence_repo
            .find_pre_alert_candidates(date, from, to)
            .await
    }

    async fn mark_pre_alert_sent(&self, occurrence_ids: &[String], at: NaiveDateTime) -> AppResult<u64> {
        self.occurrence_repo.mark_pre_alert_sent(occurrence_ids, at).await
    }

    async fn count_off_logs(
        &self,
        alarm_id: &str,
        member_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<u64> {
        self.off_log_repo
            .count_between(alarm_id, member_id, from, to)
            .await
    }

    async fn turn_off(
        &self,
        target: alarm_occurrence::Model,
        member_id: &str,
        at: NaiveDateTime,
    ) -> AppResult<bool> {
        let off_log = alarm_off_log::ActiveModel {
            id: Set(self.id_gen.generate()),
            alarm_id: Set(target.alarm_id.clone()),
            member_id: Set(member_id.to_string()),
            created_at: Set(at),
        };
        self.occurrence_repo.turn_off_with_log(target, at, off_log).await
    }
}
