//! Server clock.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Source of the server's local "now".
pub trait Clock: Send + Sync {
    /// Current wall-clock time in the server's timezone.
    fn now(&self) -> NaiveDateTime;

    /// Current calendar date in the server's timezone.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Clock backed by the system time, projected into a fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    #[must_use]
    pub const fn new(tz: Tz) -> Self {
        Self { tz }
    }

    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.tz
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}
