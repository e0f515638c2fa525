//! Database repositories.

pub mod alarm;
pub mod alarm_occurrence;
pub mod alarm_off_log;
pub mod member;

pub use alarm::AlarmRepository;
pub use alarm_occurrence::AlarmOccurrenceRepository;
pub use alarm_off_log::AlarmOffLogRepository;
pub use member::MemberRepository;
