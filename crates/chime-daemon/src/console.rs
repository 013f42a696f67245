//! Console collaborators — deliveries land on stdout as JSON event lines.
//!
//! A real deployment plugs the agent's own channels in behind the
//! [`Notifier`]/[`Executor`] seams; the daemon ships these stand-ins so the
//! scheduler is usable (and observable) from a terminal.

use async_trait::async_trait;
use chime_cron::{Executor, Notifier, Result};

/// Prints fired reminders as `{"event":"reminder.fire",...}` lines.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        println!(
            "{}",
            serde_json::json!({ "event": "reminder.fire", "message": message })
        );
        Ok(())
    }
}

/// Acknowledges task payloads on stdout instead of running an agent loop.
pub struct ConsoleExecutor;

#[async_trait]
impl Executor for ConsoleExecutor {
    async fn execute(&self, task: &str) -> Result<()> {
        println!(
            "{}",
            serde_json::json!({ "event": "task.execute", "task": task })
        );
        Ok(())
    }
}
