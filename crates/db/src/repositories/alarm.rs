//! Alarm repository.

use std::sync::Arc;

use chrono::Weekday;
use crate::entities::alarm::weekday_code;
use crate::entities::{Alarm, alarm};
use wakeup_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Alarm repository for database operations.
#[derive(Clone)]
pub struct AlarmRepository {
    db: Arc<DatabaseConnection>,
}

impl AlarmRepository {
    /// Create a new alarm repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an alarm by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<alarm::Model>> {
        Alarm::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find alarms by IDs.
    pub async fn find_by_ids(&self, ids: &[String]) -> AppResult<Vec<alarm::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Alarm::find()
            .filter(alarm::Column::Id.is_in(ids.iter().cloned()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find every alarm whose repeat set contains `day`.
    pub async fn find_by_repeat_day(&self, day: Weekday) -> AppResult<Vec<alarm::Model>> {
        Alarm::find()
            .filter(alarm::Column::RepeatDays.contains(weekday_code(day)))
            .order_by_asc(alarm::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new alarm.
    pub async fn create(&self, model: alarm::ActiveModel) -> AppResult<alarm::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn create_test_alarm(id: &str, repeat_days: &str) -> alarm::Model {
        alarm::Model {
            id: id.to_string(),
            member_id: "m1".to_string(),
            purpose: "출근".to_string(),
            time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            repeat_days: repeat_days.to_string(),
            sound_type: "DEFAULT".to_string(),
            latitude: 37.5665,
            longitude: 126.978,
            address: "서울특별시 중구 세종대로 110".to_string(),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_find_by_repeat_day_returns_matching_alarms() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    create_test_alarm("a1", "MON,WED,FRI"),
                    create_test_alarm("a2", "WED"),
                ]])
                .into_connection(),
        );

        let repo = AlarmRepository::new(db);
        let alarms = repo.find_by_repeat_day(Weekday::Wed).await.unwrap();

        assert_eq!(alarms.len(), 2);
        assert!(
            alarms
                .iter()
                .all(|a| a.repeat_weekdays().contains(&Weekday::Wed))
        );
    }

    #[tokio::test]
    async fn test_find_by_ids_empty_skips_query() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = AlarmRepository::new(db);
        let alarms = repo.find_by_ids(&[]).await.unwrap();

        assert!(alarms.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<alarm::Model>::new()])
                .into_connection(),
        );

        let repo = AlarmRepository::new(db);
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
    }
}
