use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Determines the delivery target and recurrence class of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Deliver the message verbatim through the notification collaborator.
    Reminder,
    /// Hand the message to the execution collaborator as a task description.
    Task,
    /// Fire once, deliver like a reminder, then complete.
    OneTime,
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobMode::Reminder => "reminder",
            JobMode::Task => "task",
            JobMode::OneTime => "one_time",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(JobMode::Reminder),
            "task" => Ok(JobMode::Task),
            "one_time" => Ok(JobMode::OneTime),
            other => Err(format!("unknown job mode: {other}")),
        }
    }
}

/// Defines when and how often a job should fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire repeatedly with a fixed interval in seconds.
    Interval { every_seconds: u64 },

    /// Fire according to a 5-field cron expression, interpreted in `tz`
    /// (an IANA zone name) or in the host timezone when `tz` is unset.
    Calendar {
        expr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },

    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },
}

impl Schedule {
    /// Whether this schedule re-arms after firing.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::Once { .. })
    }

    /// Short human-readable description for list output.
    pub fn summary(&self) -> String {
        match self {
            Schedule::Interval { every_seconds } => format!("every {every_seconds}s"),
            Schedule::Calendar { expr, tz: Some(tz) } => format!("cron '{expr}' ({tz})"),
            Schedule::Calendar { expr, tz: None } => format!("cron '{expr}'"),
            Schedule::Once { at } => format!("once at {}", at.to_rfc3339()),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next_fire_at time.
    Scheduled,
    /// Handed to the dispatcher; delivery is in flight.
    Firing,
    /// A one-time job that has fired. Terminal.
    Completed,
    /// Explicitly removed. Terminal; the record is kept for audit.
    Removed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Firing => "firing",
            JobStatus::Completed => "completed",
            JobStatus::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "firing" => Ok(JobStatus::Firing),
            "completed" => Ok(JobStatus::Completed),
            "removed" => Ok(JobStatus::Removed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7 string — primary key. Time-ordered, so sorting by id
    /// reproduces creation order.
    pub id: String,
    /// Short human-readable label derived from the message.
    pub name: String,
    /// Delivery target and recurrence class.
    pub mode: JobMode,
    /// Free-text payload delivered (reminder/one_time) or executed (task).
    pub message: String,
    /// When and how often to fire.
    pub schedule: Schedule,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Next planned occurrence; `None` once the schedule is exhausted.
    pub next_fire_at: Option<DateTime<Utc>>,
    /// When the job last fired, if ever.
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Total number of completed dispatches.
    pub run_count: u32,
    /// Error message from the most recent failed dispatch, if any.
    pub last_error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied atomically by the store.
///
/// `next_fire_at` and `last_error` are double-optional: the outer `Option`
/// means "touch this column", the inner value is what to write (including
/// clearing it with `None`).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub next_fire_at: Option<Option<DateTime<Utc>>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
    /// Increment `run_count` by one.
    pub bump_run_count: bool,
}

/// Raw schedule fields as supplied by an `add` request, before validation.
///
/// Exactly one of `every_seconds` / `cron_expr` / `in_seconds` / `at` must
/// be set; which of them are legal depends on the mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddJobRequest {
    /// Defaults to `reminder` when the request omits it.
    #[serde(default)]
    pub mode: JobMode,
    pub message: String,
    /// Recurring fixed interval (reminder/task).
    pub every_seconds: Option<u64>,
    /// Recurring calendar expression (reminder/task).
    pub cron_expr: Option<String>,
    /// IANA timezone for `cron_expr`; defaults to the host timezone.
    pub tz: Option<String>,
    /// One-shot, relative to now (one_time).
    pub in_seconds: Option<u64>,
    /// One-shot, absolute (one_time).
    pub at: Option<DateTime<Utc>>,
}

impl Default for JobMode {
    fn default() -> Self {
        JobMode::Reminder
    }
}
