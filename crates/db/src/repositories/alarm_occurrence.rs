//! Alarm occurrence repository.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use crate::entities::alarm_occurrence::{self, DeactivateType};
use crate::entities::{AlarmOccurrence, alarm_off_log};
use wakeup_common::{AppError, AppResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Insert,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};

fn db_err(e: DbErr) -> AppError {
    AppError::Database(e.to_string())
}

/// Alarm occurrence repository for database operations.
#[derive(Clone)]
pub struct AlarmOccurrenceRepository {
    db: Arc<DatabaseConnection>,
}

impl AlarmOccurrenceRepository {
    /// Create a new alarm occurrence repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the occurrence of an alarm on a date.
    pub async fn find_by_alarm_and_date(
        &self,
        alarm_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        AlarmOccurrence::find()
            .filter(alarm_occurrence::Column::AlarmId.eq(alarm_id))
            .filter(alarm_occurrence::Column::Date.eq(date))
            .one(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// IDs of every alarm that has an occurrence on `date`.
    pub async fn find_alarm_ids_on(&self, date: NaiveDate) -> AppResult<HashSet<String>> {
        let ids: Vec<String> = AlarmOccurrence::find()
            .select_only()
            .column(alarm_occurrence::Column::AlarmId)
            .filter(alarm_occurrence::Column::Date.eq(date))
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(db_err)?;
        Ok(ids.into_iter().collect())
    }

    /// Insert an occurrence unless one already exists for its (alarm, date).
    ///
    /// Relies on the unique `(alarm_id, date)` index. Returns the inserted
    /// row, or `None` when a concurrent writer got there first.
    pub async fn insert_if_absent(
        &self,
        model: alarm_occurrence::Model,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        let inserted = insert_ignoring_conflict(&model)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(db_err)?;

        Ok((inserted > 0).then_some(model))
    }

    /// Most recent OFF or CHECKIN occurrence of an alarm.
    pub async fn find_latest_deactivated(
        &self,
        alarm_id: &str,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        AlarmOccurrence::find()
            .filter(alarm_occurrence::Column::AlarmId.eq(alarm_id))
            .filter(
                alarm_occurrence::Column::DeactivateType
                    .is_in([DeactivateType::Off, DeactivateType::Checkin]),
            )
            .order_by_desc(alarm_occurrence::Column::Date)
            .order_by_desc(alarm_occurrence::Column::Time)
            .one(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Active, not yet ringing occurrences on `date` with a time in `[from, to]`.
    pub async fn find_ring_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        AlarmOccurrence::find()
            .filter(alarm_occurrence::Column::Date.eq(date))
            .filter(alarm_occurrence::Column::Time.between(from, to))
            .filter(alarm_occurrence::Column::DeactivateType.eq(DeactivateType::None))
            .filter(alarm_occurrence::Column::IsRinging.eq(false))
            .order_by_asc(alarm_occurrence::Column::Time)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Active occurrences on `date` with a time in `[from, to)` that have
    /// not been pre-alerted.
    pub async fn find_pre_alert_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        AlarmOccurrence::find()
            .filter(alarm_occurrence::Column::Date.eq(date))
            .filter(alarm_occurrence::Column::Time.gte(from))
            .filter(alarm_occurrence::Column::Time.lt(to))
            .filter(alarm_occurrence::Column::DeactivateType.eq(DeactivateType::None))
            .filter(alarm_occurrence::Column::PreAlertSentAt.is_null())
            .order_by_asc(alarm_occurrence::Column::Time)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Flag an occurrence as ringing and bump its ring counter.
    ///
    /// Returns `false` if it was already ringing.
    pub async fn mark_ringing(&self, id: &str) -> AppResult<bool> {
        let result = AlarmOccurrence::update_many()
            .col_expr(alarm_occurrence::Column::IsRinging, Expr::value(true))
            .col_expr(
                alarm_occurrence::Column::RingCount,
                Expr::col(alarm_occurrence::Column::RingCount).add(1),
            )
            .filter(alarm_occurrence::Column::Id.eq(id))
            .filter(alarm_occurrence::Column::IsRinging.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected > 0)
    }

    /// Record that the pre-alert push was delivered.
    pub async fn mark_pre_alert_sent(&self, ids: &[String], at: NaiveDateTime) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = AlarmOccurrence::update_many()
            .col_expr(alarm_occurrence::Column::PreAlertSentAt, Expr::value(at))
            .filter(alarm_occurrence::Column::Id.is_in(ids.iter().cloned()))
            .exec(self.db.as_ref())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected)
    }

    /// Turn an occurrence OFF and append the matching off log, atomically.
    ///
    /// `candidate` is inserted first when its (alarm, date) has no row yet,
    /// so an occurrence created on demand only survives together with its
    /// OFF marker and log. The update only applies while the marker is
    /// still `NONE`. Returns `false` (and writes nothing) when another
    /// request deactivated the occurrence first.
    pub async fn turn_off_with_log(
        &self,
        candidate: alarm_occurrence::Model,
        at: NaiveDateTime,
        off_log: alarm_off_log::ActiveModel,
    ) -> AppResult<bool> {
        let txn = self.db.begin().await.map_err(db_err)?;

        insert_ignoring_conflict(&candidate)
            .exec_without_returning(&txn)
            .await
            .map_err(db_err)?;

        let result = AlarmOccurrence::update_many()
            .col_expr(
                alarm_occurrence::Column::DeactivateType,
                Expr::value(DeactivateType::Off.to_value()),
            )
            .col_expr(alarm_occurrence::Column::DeactivatedAt, Expr::value(at))
            .filter(alarm_occurrence::Column::AlarmId.eq(candidate.alarm_id.as_str()))
            .filter(alarm_occurrence::Column::Date.eq(candidate.date))
            .filter(alarm_occurrence::Column::DeactivateType.eq(DeactivateType::None))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            txn.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        off_log.insert(&txn).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;

        Ok(true)
    }
}

/// `INSERT ... ON CONFLICT (alarm_id, date) DO NOTHING` for one occurrence.
fn insert_ignoring_conflict(model: &alarm_occurrence::Model) -> Insert<alarm_occurrence::ActiveModel> {
    let active = alarm_occurrence::ActiveModel {
        id: Set(model.id.clone()),
        alarm_id: Set(model.alarm_id.clone()),
        date: Set(model.date),
        time: Set(model.time),
        deactivate_type: Set(model.deactivate_type),
        deactivated_at: Set(model.deactivated_at),
        checked_in_at: Set(model.checked_in_at),
        is_ringing: Set(model.is_ringing),
        ring_count: Set(model.ring_count),
        pre_alert_sent_at: Set(model.pre_alert_sent_at),
        created_at: Set(model.created_at),
    };

    AlarmOccurrence::insert(active).on_conflict(
        OnConflict::columns([
            alarm_occurrence::Column::AlarmId,
            alarm_occurrence::Column::Date,
        ])
        .do_nothing()
        .to_owned(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_occurrence(id: &str, alarm_id: &str, marker: DeactivateType) -> alarm_occurrence::Model {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        alarm_occurrence::Model {
            id: id.to_string(),
            alarm_id: alarm_id.to_string(),
            date,
            time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            deactivate_type: marker,
            deactivated_at: None,
            checked_in_at: None,
            is_ringing: false,
            ring_count: 0,
            pre_alert_sent_at: None,
            created_at: date.and_hms_opt(0, 0, 1).unwrap(),
        }
    }

    fn test_off_log() -> alarm_off_log::ActiveModel {
        alarm_off_log::ActiveModel {
            id: Set("log1".to_string()),
            alarm_id: Set("a1".to_string()),
            member_id: Set("m1".to_string()),
            created_at: Set(NaiveDate::from_ymd_opt(2025, 3, 5)
                .unwrap()
                .and_hms_opt(6, 30, 0)
                .unwrap()),
        }
    }

    #[tokio::test]
    async fn test_find_by_alarm_and_date_found() {
        let occurrence = create_test_occurrence("o1", "a1", DeactivateType::None);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[occurrence.clone()]])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let found = repo
            .find_by_alarm_and_date("a1", occurrence.date)
            .await
            .unwrap();

        assert_eq!(found, Some(occurrence));
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_conflict() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let inserted = repo
            .insert_if_absent(create_test_occurrence("o1", "a1", DeactivateType::None))
            .await
            .unwrap();

        assert!(inserted.is_none());
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_new_row() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let inserted = repo
            .insert_if_absent(create_test_occurrence("o1", "a1", DeactivateType::None))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inserted.id, "o1");
    }

    #[tokio::test]
    async fn test_find_latest_deactivated() {
        let occurrence = create_test_occurrence("o1", "a1", DeactivateType::Off);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[occurrence]])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let latest = repo.find_latest_deactivated("a1").await.unwrap().unwrap();

        assert_eq!(latest.deactivate_type, DeactivateType::Off);
    }

    #[tokio::test]
    async fn test_mark_ringing_only_once() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);

        assert!(repo.mark_ringing("o1").await.unwrap());
        assert!(!repo.mark_ringing("o1").await.unwrap());
    }

    #[tokio::test]
    async fn test_turn_off_with_log_commits_all_writes() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    // Candidate insert, then the NONE -> OFF update.
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .append_query_results([[alarm_off_log::Model {
                    id: "log1".to_string(),
                    alarm_id: "a1".to_string(),
                    member_id: "m1".to_string(),
                    created_at: NaiveDate::from_ymd_opt(2025, 3, 5)
                        .unwrap()
                        .and_hms_opt(6, 30, 0)
                        .unwrap(),
                }]])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let at = NaiveDate::from_ymd_opt(2025, 3, 5)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        let candidate = create_test_occurrence("o1", "a1", DeactivateType::None);

        assert!(repo.turn_off_with_log(candidate, at, test_off_log()).await.unwrap());
    }

    #[tokio::test]
    async fn test_turn_off_with_log_skips_log_when_already_deactivated() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    // Existing row wins the insert, but its marker is no longer NONE.
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = AlarmOccurrenceRepository::new(db);
        let at = NaiveDate::from_ymd_opt(2025, 3, 5)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        let candidate = create_test_occurrence("o2", "a1", DeactivateType::None);

        assert!(!repo.turn_off_with_log(candidate, at, test_off_log()).await.unwrap());
    }
}
