//! Alarm off log repository.

use std::sync::Arc;

use chrono::NaiveDateTime;
use crate::entities::{AlarmOffLog, alarm_off_log};
use wakeup_common::{AppError, AppResult};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};

/// Alarm off log repository for database operations.
#[derive(Clone)]
pub struct AlarmOffLogRepository {
    db: Arc<DatabaseConnection>,
}

impl AlarmOffLogRepository {
    /// Create a new alarm off log repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Count off logs of a member's alarm created in `[from, to)`.
    pub async fn count_between(
        &self,
        alarm_id: &str,
        member_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<u64> {
        AlarmOffLog::find()
            .filter(alarm_off_log::Column::AlarmId.eq(alarm_id))
            .filter(alarm_off_log::Column::MemberId.eq(member_id))
            .filter(alarm_off_log::Column::CreatedAt.gte(from))
            .filter(alarm_off_log::Column::CreatedAt.lt(to))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
