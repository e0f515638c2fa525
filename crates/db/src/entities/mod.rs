//! Database entities.

pub mod alarm;
pub mod alarm_occurrence;
pub mod alarm_off_log;
pub mod member;

pub use alarm::Entity as Alarm;
pub use alarm_occurrence::Entity as AlarmOccurrence;
pub use alarm_off_log::Entity as AlarmOffLog;
pub use member::Entity as Member;
