//! `chime-cron` — durable job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Jobs are persisted to a SQLite `jobs` table. The [`engine::SchedulerEngine`]
//! sleeps until the soonest `next_fire_at`, wakes early on store mutations,
//! and hands due jobs to a bounded dispatch pool. Each occurrence is
//! delivered at most once; after a restart, overdue jobs fire exactly once
//! and recurring jobs resume cadence from the current instant.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                                |
//! |------------|----------------------------------------------------------|
//! | `Interval` | Repeat every N seconds                                   |
//! | `Calendar` | 5-field cron expression, evaluated in an IANA timezone   |
//! | `Once`     | Single fire at an absolute UTC instant                   |
//!
//! # Job modes
//!
//! | Mode       | Delivery                                                 |
//! |------------|----------------------------------------------------------|
//! | `reminder` | Message forwarded verbatim to the [`Notifier`]           |
//! | `task`     | Description handed to the [`Executor`]                   |
//! | `one_time` | Like `reminder`, but completes after one fire            |

pub mod cron;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;
pub mod types;

pub use cron::{CronExpr, CronParseError};
pub use dispatch::{DispatchOutcome, DispatchResult, Dispatcher, Executor, Notifier};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use schedule::next_fire;
pub use store::JobStore;
pub use types::{AddJobRequest, Job, JobMode, JobPatch, JobStatus, Schedule};
