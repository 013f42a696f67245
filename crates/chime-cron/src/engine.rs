//! The scheduler loop and its management handle.
//!
//! [`SchedulerEngine::run`] owns the wait/fire cycle: sleep until the
//! soonest `next_fire_at`, wake early when the handle mutates the store,
//! hand due jobs to the dispatcher, and re-arm or complete them when the
//! dispatch outcome comes back. [`SchedulerHandle`] is the add/list/remove
//! surface exposed to the surrounding agent.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchOutcome, DispatchResult, Dispatcher, Executor, Notifier};
use crate::error::{Result, SchedulerError};
use crate::schedule::next_fire;
use crate::store::JobStore;
use crate::types::{AddJobRequest, Job, JobMode, JobPatch, JobStatus, Schedule};

/// Backoff before retrying the due/soonest queries after a store error, so
/// a persistent database fault cannot spin the loop hot.
const DB_RETRY_SECS: i64 = 1;

/// Capacity of the dispatch completion channel.
const COMPLETION_BUFFER: usize = 64;

/// Shared handle for job management while the engine loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: JobStore,
    wakeup: Arc<Notify>,
}

impl SchedulerHandle {
    /// Validate and persist a new job, then wake the engine so an earlier
    /// fire time is picked up immediately.
    pub fn add_job(&self, req: AddJobRequest) -> Result<Job> {
        if req.message.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(
                "message is required".to_string(),
            ));
        }

        let now = Utc::now();
        let schedule = build_schedule(&req, now)?;
        let next = match &schedule {
            // A past instant is allowed through: the loop fires it
            // immediately, once, then completes the job.
            Schedule::Once { at } => *at,
            other => next_fire(other, now).ok_or_else(|| {
                SchedulerError::InvalidSchedule(
                    "expression never matches a future instant".to_string(),
                )
            })?,
        };

        let job = self.store.create(req.mode, &req.message, schedule, next)?;
        info!(job_id = %job.id, mode = %job.mode, next_fire_at = %next, "job added");
        self.wakeup.notify_one();
        Ok(job)
    }

    /// All live jobs in creation order. Removed records stay in the store
    /// for audit but are not listed.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|job| job.status != JobStatus::Removed)
            .collect())
    }

    /// Remove a job. Guarantees it never fires again, even if it is due or
    /// currently in flight. Idempotent for already-removed ids.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.store.remove(id)?;
        info!(job_id = %id, "job removed");
        self.wakeup.notify_one();
        Ok(())
    }
}

/// Core scheduler: waits for the soonest fire time and drives dispatch.
pub struct SchedulerEngine {
    store: JobStore,
    dispatcher: Dispatcher,
    wakeup: Arc<Notify>,
    done_rx: mpsc::Receiver<DispatchResult>,
}

impl SchedulerEngine {
    /// Build an engine plus the handle that feeds it.
    pub fn new(
        store: JobStore,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn Executor>,
        max_concurrent_dispatches: usize,
    ) -> (Self, SchedulerHandle) {
        let wakeup = Arc::new(Notify::new());
        let (done_tx, done_rx) = mpsc::channel(COMPLETION_BUFFER);
        let dispatcher = Dispatcher::new(notifier, executor, max_concurrent_dispatches, done_tx);

        let handle = SchedulerHandle {
            store: store.clone(),
            wakeup: Arc::clone(&wakeup),
        };
        let engine = Self {
            store,
            dispatcher,
            wakeup,
            done_rx,
        };
        (engine, handle)
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true`.
    ///
    /// The first pass doubles as the restart catch-up: any job whose
    /// `next_fire_at` is already past fires exactly once, then recurring
    /// jobs resume cadence from the current instant.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");

        loop {
            let healthy = self.fire_due_jobs();
            let next = if healthy {
                match self.store.soonest() {
                    Ok(next) => next,
                    Err(e) => {
                        error!("soonest-job query failed: {e}");
                        Some(Utc::now() + Duration::seconds(DB_RETRY_SECS))
                    }
                }
            } else {
                Some(Utc::now() + Duration::seconds(DB_RETRY_SECS))
            };

            tokio::select! {
                _ = sleep_until_due(next) => {}
                _ = self.wakeup.notified() => {
                    debug!("woken by store mutation");
                }
                Some(result) = self.done_rx.recv() => {
                    self.on_dispatch_complete(result);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Hand every due job to the dispatcher, in fire-time then creation
    /// order. Returns false when the store misbehaved and the loop should
    /// back off before retrying.
    fn fire_due_jobs(&self) -> bool {
        let now = Utc::now();
        let due = match self.store.due(now) {
            Ok(due) => due,
            Err(e) => {
                error!("due-job query failed: {e}");
                return false;
            }
        };

        for job in due {
            // Mark Firing first; a job that lost a race with removal is
            // skipped and never dispatched.
            let claimed = self.store.update(
                &job.id,
                JobPatch {
                    status: Some(JobStatus::Firing),
                    ..Default::default()
                },
            );
            match claimed {
                Ok(()) => {
                    debug!(job_id = %job.id, mode = %job.mode, "dispatching job");
                    self.dispatcher.spawn(job);
                }
                Err(SchedulerError::JobNotFound { .. }) => {
                    debug!(job_id = %job.id, "job removed before dispatch");
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to mark job firing");
                }
            }
        }
        true
    }

    /// Apply a dispatch outcome: re-arm recurring jobs from the current
    /// instant (not the missed due time), complete one-time jobs, and never
    /// re-arm a job that was removed while in flight.
    fn on_dispatch_complete(&self, result: DispatchResult) {
        let now = Utc::now();
        let job = match self.store.get(&result.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %result.job_id, "completed dispatch for unknown job");
                return;
            }
            Err(e) => {
                error!(job_id = %result.job_id, error = %e, "failed to load job after dispatch");
                return;
            }
        };
        if job.status == JobStatus::Removed {
            debug!(job_id = %job.id, "job removed while firing; not re-arming");
            return;
        }

        let last_error = match &result.outcome {
            DispatchOutcome::Delivered => None,
            // A failed delivery is not retried mid-cycle; the job simply
            // waits for its next scheduled occurrence.
            DispatchOutcome::Failed(reason) => Some(reason.clone()),
        };

        let patch = if job.mode == JobMode::OneTime {
            info!(job_id = %job.id, "one-time job completed");
            JobPatch {
                status: Some(JobStatus::Completed),
                next_fire_at: Some(None),
                last_fired_at: Some(now),
                last_error: Some(last_error),
                bump_run_count: true,
            }
        } else {
            let next = next_fire(&job.schedule, now);
            match next {
                Some(next) => debug!(job_id = %job.id, next_fire_at = %next, "job re-armed"),
                None => warn!(job_id = %job.id, "schedule produced no further occurrence"),
            }
            JobPatch {
                status: Some(JobStatus::Scheduled),
                next_fire_at: Some(next),
                last_fired_at: Some(now),
                last_error: Some(last_error),
                bump_run_count: true,
            }
        };

        if let Err(e) = self.store.update(&job.id, patch) {
            // A removal racing the update also lands here; either way the
            // job must not be re-armed.
            warn!(job_id = %job.id, error = %e, "post-dispatch update failed");
        }
    }
}

/// Sleep until `next` arrives, or forever when nothing is scheduled.
async fn sleep_until_due(next: Option<DateTime<Utc>>) {
    match next {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Turn raw request fields into a validated [`Schedule`].
///
/// Exactly one of the four schedule fields must be supplied, and it must
/// belong to the requested mode: `every_seconds`/`cron_expr` for recurring
/// modes, `in_seconds`/`at` for `one_time`.
fn build_schedule(req: &AddJobRequest, now: DateTime<Utc>) -> Result<Schedule> {
    let supplied = [
        req.every_seconds.is_some(),
        req.cron_expr.is_some(),
        req.in_seconds.is_some(),
        req.at.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if supplied != 1 {
        return Err(SchedulerError::InvalidSchedule(
            "specify exactly one of every_seconds, cron_expr, in_seconds, or at".to_string(),
        ));
    }
    if req.tz.is_some() && req.cron_expr.is_none() {
        return Err(SchedulerError::InvalidSchedule(
            "tz is only valid together with cron_expr".to_string(),
        ));
    }

    match req.mode {
        JobMode::Reminder | JobMode::Task => {
            if let Some(every_seconds) = req.every_seconds {
                if every_seconds == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "every_seconds must be > 0".to_string(),
                    ));
                }
                Ok(Schedule::Interval { every_seconds })
            } else if let Some(expr) = &req.cron_expr {
                expr.parse::<crate::cron::CronExpr>()
                    .map_err(|e| SchedulerError::InvalidExpression(e.to_string()))?;
                if let Some(tz) = &req.tz {
                    tz.parse::<chrono_tz::Tz>().map_err(|_| {
                        SchedulerError::InvalidSchedule(format!("unknown timezone '{tz}'"))
                    })?;
                }
                Ok(Schedule::Calendar {
                    expr: expr.clone(),
                    tz: req.tz.clone(),
                })
            } else {
                Err(SchedulerError::InvalidSchedule(format!(
                    "{} jobs take every_seconds or cron_expr",
                    req.mode
                )))
            }
        }
        JobMode::OneTime => {
            if let Some(in_seconds) = req.in_seconds {
                if in_seconds == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "in_seconds must be > 0".to_string(),
                    ));
                }
                Ok(Schedule::Once {
                    at: now + Duration::seconds(in_seconds as i64),
                })
            } else if let Some(at) = req.at {
                Ok(Schedule::Once { at })
            } else {
                Err(SchedulerError::InvalidSchedule(
                    "one_time jobs take in_seconds or at".to_string(),
                ))
            }
        }
    }
}
