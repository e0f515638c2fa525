//! Alarm occurrence entity (one calendar-dated instance of an alarm).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How an occurrence stopped being active.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DeactivateType {
    #[sea_orm(string_value = "NONE")]
    None,
    #[sea_orm(string_value = "OFF")]
    Off,
    #[sea_orm(string_value = "CHECKIN")]
    Checkin,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alarm_occurrence")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub alarm_id: String,

    /// Calendar date this occurrence represents
    pub date: Date,

    /// Time of day copied from the alarm when the row was created
    pub time: Time,

    pub deactivate_type: DeactivateType,

    #[sea_orm(nullable)]
    pub deactivated_at: Option<DateTime>,

    #[sea_orm(nullable)]
    pub checked_in_at: Option<DateTime>,

    #[sea_orm(default_value = false)]
    pub is_ringing: bool,

    #[sea_orm(default_value = 0)]
    pub ring_count: i32,

    /// When the one-hour-ahead push went out
    #[sea_orm(nullable)]
    pub pre_alert_sent_at: Option<DateTime>,

    pub created_at: DateTime,
}

impl Model {
    /// The wall-clock moment this occurrence rings.
    #[must_use]
    pub fn rings_at(&self) -> DateTime {
        self.date.and_time(self.time)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::alarm::Entity",
        from = "Column::AlarmId",
        to = "super::alarm::Column::Id",
        on_delete = "Cascade"
    )]
    Alarm,
}

impl Related<super::alarm::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alarm.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
