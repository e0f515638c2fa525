//! Alarm entity.

use std::collections::HashSet;

use chrono::Weekday;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Weekdays in storage order (Monday first).
pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A member's recurring alarm.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alarm")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owner of the alarm
    #[sea_orm(indexed)]
    pub member_id: String,

    /// What the alarm is for ("출근", "헬스장" ...)
    pub purpose: String,

    /// Time of day the alarm rings
    pub time: Time,

    /// Repeat set as comma separated weekday codes, e.g. `MON,WED,FRI`
    pub repeat_days: String,

    /// Sound selector understood by the client
    pub sound_type: String,

    pub latitude: f64,

    pub longitude: f64,

    #[sea_orm(column_type = "Text")]
    pub address: String,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// The repeat set of this alarm.
    ///
    /// Unknown codes are skipped; an empty result is left for the calendar
    /// code to reject.
    #[must_use]
    pub fn repeat_weekdays(&self) -> HashSet<Weekday> {
        parse_repeat_days(&self.repeat_days)
    }
}

/// Storage code for a weekday (`MON` ... `SUN`).
#[must_use]
pub const fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

/// Decode a stored repeat set.
#[must_use]
pub fn parse_repeat_days(raw: &str) -> HashSet<Weekday> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .filter_map(|code| code.parse::<Weekday>().ok())
        .collect()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::member::Entity",
        from = "Column::MemberId",
        to = "super::member::Column::Id",
        on_delete = "Cascade"
    )]
    Member,

    #[sea_orm(has_many = "super::alarm_occurrence::Entity")]
    AlarmOccurrence,
}

impl Related<super::member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Member.def()
    }
}

impl Related<super::alarm_occurrence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlarmOccurrence.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
