// End-to-end scheduler scenarios: real store, real engine loop, mock
// collaborators. Intervals are scaled down to a second so the tests stay
// fast while exercising the same wait/fire/re-arm cycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{watch, Semaphore};

use chime_cron::{
    AddJobRequest, Executor, Job, JobMode, JobStatus, Notifier, Result, Schedule, SchedulerEngine,
    SchedulerError, SchedulerHandle, JobStore,
};

struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            return Err(SchedulerError::Delivery("gateway unreachable".into()));
        }
        Ok(())
    }
}

/// Notifier that blocks mid-delivery until the test releases it.
struct GatedNotifier {
    started: AtomicUsize,
    delivered: AtomicUsize,
    gate: Semaphore,
}

impl GatedNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Notifier for GatedNotifier {
    async fn notify(&self, _message: &str) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct NullExecutor;

#[async_trait]
impl Executor for NullExecutor {
    async fn execute(&self, _task: &str) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    handle: SchedulerHandle,
    store: JobStore,
    shutdown_tx: watch::Sender<bool>,
}

/// Seed jobs via `seed` (before the engine starts — this is how downtime is
/// simulated), then spawn the loop.
fn start_engine(
    notifier: Arc<dyn Notifier>,
    max_concurrent: usize,
    seed: impl FnOnce(&JobStore) -> Vec<Job>,
) -> (Harness, Vec<Job>) {
    let store = JobStore::new(Connection::open_in_memory().unwrap()).unwrap();
    let seeded = seed(&store);
    let (engine, handle) =
        SchedulerEngine::new(store.clone(), notifier, Arc::new(NullExecutor), max_concurrent);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx));
    (
        Harness {
            handle,
            store,
            shutdown_tx,
        },
        seeded,
    )
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn reminder_every(seconds: u64, message: &str) -> AddJobRequest {
    AddJobRequest {
        mode: JobMode::Reminder,
        message: message.to_string(),
        every_seconds: Some(seconds),
        ..Default::default()
    }
}

#[tokio::test]
async fn interval_reminder_fires_with_the_configured_message_and_rearms() {
    let notifier = RecordingNotifier::new();
    let (harness, _) = start_engine(notifier.clone(), 4, |_| Vec::new());

    let job = harness
        .handle
        .add_job(reminder_every(1, "drink some water"))
        .unwrap();

    wait_for("first dispatch", || notifier.count() == 1).await;
    assert_eq!(
        notifier.messages.lock().unwrap().as_slice(),
        ["drink some water"]
    );

    // After the outcome lands the job is re-armed one interval ahead.
    wait_for("re-arm", || {
        harness
            .store
            .get(&job.id)
            .unwrap()
            .is_some_and(|j| j.run_count == 1 && j.status == JobStatus::Scheduled)
    })
    .await;

    let rearmed = harness.store.get(&job.id).unwrap().unwrap();
    let fired = rearmed.last_fired_at.unwrap();
    assert_eq!(
        rearmed.next_fire_at.unwrap(),
        fired + chrono::Duration::seconds(1)
    );
    assert_eq!(rearmed.last_error, None);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn one_time_in_the_past_fires_immediately_then_completes() {
    let notifier = RecordingNotifier::new();
    let (harness, _) = start_engine(notifier.clone(), 4, |_| Vec::new());

    let job = harness
        .handle
        .add_job(AddJobRequest {
            mode: JobMode::OneTime,
            message: "you had a meeting".to_string(),
            at: Some(Utc::now() - chrono::Duration::minutes(5)),
            ..Default::default()
        })
        .unwrap();

    wait_for("immediate dispatch", || notifier.count() == 1).await;
    wait_for("completion", || {
        harness
            .store
            .get(&job.id)
            .unwrap()
            .is_some_and(|j| j.status == JobStatus::Completed)
    })
    .await;

    let done = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(done.next_fire_at, None);
    assert_eq!(done.run_count, 1);

    // It never reappears in the scheduled ordering.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(notifier.count(), 1);
    assert_eq!(harness.store.soonest().unwrap(), None);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn restart_catch_up_fires_exactly_once_per_overdue_job() {
    let notifier = RecordingNotifier::new();

    // Downtime simulation: the job missed three occurrences while no engine
    // was running.
    let (harness, seeded) = start_engine(notifier.clone(), 4, |store| {
        let overdue = Utc::now() - chrono::Duration::seconds(180);
        vec![store
            .create(
                JobMode::Reminder,
                "hourly check-in",
                Schedule::Interval { every_seconds: 60 },
                overdue,
            )
            .unwrap()]
    });
    let job = &seeded[0];

    wait_for("catch-up dispatch", || notifier.count() >= 1).await;
    wait_for("re-arm", || {
        harness
            .store
            .get(&job.id)
            .unwrap()
            .is_some_and(|j| j.status == JobStatus::Scheduled && j.run_count == 1)
    })
    .await;

    // One firing, not three, and the cadence restarts from now.
    assert_eq!(notifier.count(), 1);
    let rearmed = harness.store.get(&job.id).unwrap().unwrap();
    assert!(rearmed.next_fire_at.unwrap() > Utc::now());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(notifier.count(), 1);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn jobs_due_at_the_same_instant_dispatch_in_creation_order() {
    let notifier = RecordingNotifier::new();

    // Single dispatch slot serializes delivery so the order is observable.
    let (harness, _) = start_engine(notifier.clone(), 1, |store| {
        let due = Utc::now() - chrono::Duration::seconds(1);
        let a = store
            .create(
                JobMode::Reminder,
                "A",
                Schedule::Interval { every_seconds: 3600 },
                due,
            )
            .unwrap();
        let b = store
            .create(
                JobMode::Reminder,
                "B",
                Schedule::Interval { every_seconds: 3600 },
                due,
            )
            .unwrap();
        vec![a, b]
    });

    wait_for("both dispatches", || notifier.count() == 2).await;
    assert_eq!(notifier.messages.lock().unwrap().as_slice(), ["A", "B"]);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn removed_job_never_fires_even_when_already_due() {
    let notifier = RecordingNotifier::new();
    let (harness, _) = start_engine(notifier.clone(), 4, |_| Vec::new());

    let job = harness
        .handle
        .add_job(reminder_every(1, "should not arrive"))
        .unwrap();
    harness.handle.remove_job(&job.id).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(notifier.count(), 0);
    assert_eq!(
        harness.store.get(&job.id).unwrap().unwrap().status,
        JobStatus::Removed
    );

    // Idempotent re-removal still succeeds.
    harness.handle.remove_job(&job.id).unwrap();

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn removal_during_flight_lets_delivery_finish_but_never_rearms() {
    let notifier = GatedNotifier::new();

    let (harness, seeded) = start_engine(notifier.clone(), 4, |store| {
        vec![store
            .create(
                JobMode::Reminder,
                "in flight",
                Schedule::Interval { every_seconds: 60 },
                Utc::now() - chrono::Duration::seconds(1),
            )
            .unwrap()]
    });
    let job = &seeded[0];

    wait_for("dispatch start", || {
        notifier.started.load(Ordering::SeqCst) == 1
    })
    .await;

    // Remove while the delivery is blocked in flight, then let it finish.
    harness.handle.remove_job(&job.id).unwrap();
    notifier.release();

    wait_for("delivery finish", || {
        notifier.delivered.load(Ordering::SeqCst) == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Removed);
    assert_eq!(after.next_fire_at, None);
    // The in-flight delivery completed exactly once, with no follow-up.
    assert_eq!(notifier.started.load(Ordering::SeqCst), 1);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn failed_delivery_rearms_with_the_error_recorded() {
    let notifier = RecordingNotifier::failing();
    let (harness, seeded) = start_engine(notifier.clone(), 4, |store| {
        vec![store
            .create(
                JobMode::Reminder,
                "flaky channel",
                Schedule::Interval { every_seconds: 3600 },
                Utc::now() - chrono::Duration::seconds(1),
            )
            .unwrap()]
    });
    let job = &seeded[0];

    wait_for("failed attempt", || notifier.count() == 1).await;
    wait_for("re-arm after failure", || {
        harness
            .store
            .get(&job.id)
            .unwrap()
            .is_some_and(|j| j.status == JobStatus::Scheduled && j.run_count == 1)
    })
    .await;

    // No mid-cycle retry: one attempt, then the job waits a full interval.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(notifier.count(), 1);

    let rearmed = harness.store.get(&job.id).unwrap().unwrap();
    assert!(rearmed
        .last_error
        .as_deref()
        .unwrap()
        .contains("gateway unreachable"));
    assert!(rearmed.next_fire_at.unwrap() > Utc::now());

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn task_mode_goes_through_the_executor() {
    struct RecordingExecutor {
        tasks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, task: &str) -> Result<()> {
            self.tasks.lock().unwrap().push(task.to_string());
            Ok(())
        }
    }

    let notifier = RecordingNotifier::new();
    let executor = Arc::new(RecordingExecutor {
        tasks: Mutex::new(Vec::new()),
    });

    let store = JobStore::new(Connection::open_in_memory().unwrap()).unwrap();
    store
        .create(
            JobMode::Task,
            "tidy the inbox",
            Schedule::Interval { every_seconds: 3600 },
            Utc::now() - chrono::Duration::seconds(1),
        )
        .unwrap();

    let (engine, _handle) =
        SchedulerEngine::new(store, notifier.clone(), executor.clone(), 4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx));

    wait_for("task execution", || {
        executor.tasks.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(
        executor.tasks.lock().unwrap().as_slice(),
        ["tidy the inbox"]
    );
    assert_eq!(notifier.count(), 0);

    let _ = shutdown_tx.send(true);
}
