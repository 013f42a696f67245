use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule fields are missing, conflicting, or out of range.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The calendar expression does not parse.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A collaborator failed to deliver or execute a payload.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl SchedulerError {
    /// Short error code string for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::InvalidExpression(_) => "INVALID_EXPRESSION",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Delivery(_) => "DELIVERY_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
