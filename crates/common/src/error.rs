//! Error types for the wakeup backend.

use chrono::NaiveDate;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Alarm Domain Errors ===
    #[error("Repeat days not configured")]
    RepeatDaysNotConfigured,

    #[error("Client date {client} does not match server date {server}")]
    InvalidClientDate { client: NaiveDate, server: NaiveDate },

    #[error("Weekly alarm off limit exceeded")]
    AlarmOffLimitExceeded,

    #[error("Alarm occurrence already deactivated")]
    AlreadyDeactivated,

    #[error("Alarm not found: {0}")]
    AlarmNotFound(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // === Server Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Push gateway error: {0}")]
    Push(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code the boundary layer exposes to clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RepeatDaysNotConfigured => "REPEAT_DAYS_NOT_CONFIGURED",
            Self::InvalidClientDate { .. } => "INVALID_CLIENT_DATE",
            Self::AlarmOffLimitExceeded => "ALARM_OFF_LIMIT_EXCEEDED",
            Self::AlreadyDeactivated => "ALREADY_DEACTIVATED",
            Self::AlarmNotFound(_) => "ALARM_NOT_FOUND",
            Self::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Push(_) => "PUSH_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    ///
    /// `RepeatDaysNotConfigured` counts as a server error: it is only
    /// reachable through a broken alarm row, never through member input.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::RepeatDaysNotConfigured
                | Self::Database(_)
                | Self::Redis(_)
                | Self::Push(_)
                | Self::Config(_)
                | Self::Internal(_)
        )
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
