//! Dispatch of due jobs to their collaborators.
//!
//! The scheduler loop hands a due job to [`Dispatcher::spawn`] and moves on
//! immediately; delivery runs in its own task, capped by a semaphore, and
//! the outcome comes back over an mpsc channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{Job, JobMode};

/// Delivers a reminder message to the end user through whatever channel the
/// surrounding agent uses.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Hands a task description to the agent's own execution loop.
///
/// Implementations return once execution has *completed*, not with the
/// task's full result content — results travel through the executor's own
/// channel.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &str) -> Result<()>;
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

/// Completion report sent back to the scheduler loop.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub job_id: String,
    pub outcome: DispatchOutcome,
}

/// Fire-and-forget delivery pool with bounded concurrency.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn Executor>,
    limiter: Arc<Semaphore>,
    done_tx: mpsc::Sender<DispatchResult>,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn Executor>,
        max_concurrent: usize,
        done_tx: mpsc::Sender<DispatchResult>,
    ) -> Self {
        Self {
            notifier,
            executor,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            done_tx,
        }
    }

    /// Hand a due job to its collaborator without blocking the caller.
    ///
    /// The concurrency permit is acquired *inside* the spawned task, so a
    /// saturated pool queues the job rather than stalling the scheduler
    /// loop. The semaphore is FIFO, preserving dispatch order under load.
    pub fn spawn(&self, job: Job) {
        let notifier = Arc::clone(&self.notifier);
        let executor = Arc::clone(&self.executor);
        let limiter = Arc::clone(&self.limiter);
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let _permit = match limiter.acquire_owned().await {
                Ok(permit) => permit,
                // Closed semaphore means the dispatcher was torn down.
                Err(_) => return,
            };

            let started = std::time::Instant::now();
            let result = match job.mode {
                JobMode::Reminder | JobMode::OneTime => notifier.notify(&job.message).await,
                JobMode::Task => executor.execute(&job.message).await,
            };

            let outcome = match result {
                Ok(()) => DispatchOutcome::Delivered,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "dispatch failed");
                    DispatchOutcome::Failed(e.to_string())
                }
            };
            debug!(
                job_id = %job.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                delivered = outcome == DispatchOutcome::Delivered,
                "dispatch finished"
            );

            if done_tx
                .send(DispatchResult {
                    job_id: job.id,
                    outcome,
                })
                .await
                .is_err()
            {
                // Loop already shut down; nothing left to update.
                debug!("dispatch completion channel closed");
            }
        });
    }
}
