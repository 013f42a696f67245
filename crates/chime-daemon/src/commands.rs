//! Line-oriented JSON command surface.
//!
//! One command per line on stdin, one JSON response per line on stdout:
//!
//! ```text
//! {"action":"add","mode":"reminder","message":"stretch","every_seconds":1200}
//! {"action":"list"}
//! {"action":"remove","job_id":"0190..."}
//! ```

use chime_cron::{AddJobRequest, Job, SchedulerHandle};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Command {
    Add(AddJobRequest),
    List,
    Remove { job_id: String },
}

/// Execute one command line and render the response.
pub fn handle_line(handle: &SchedulerHandle, line: &str) -> String {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            return error_response("BAD_REQUEST", &format!("unparseable command: {e}"));
        }
    };

    let result = match command {
        Command::Add(req) => handle.add_job(req).map(|job| {
            json!({
                "ok": true,
                "job_id": job.id,
                "name": job.name,
                "schedule": job.schedule.summary(),
                "next_fire_at": job.next_fire_at.map(|t| t.to_rfc3339()),
            })
        }),
        Command::List => handle.list_jobs().map(|jobs| {
            json!({
                "ok": true,
                "jobs": jobs.iter().map(job_row).collect::<Vec<_>>(),
            })
        }),
        Command::Remove { job_id } => handle
            .remove_job(&job_id)
            .map(|()| json!({ "ok": true, "job_id": job_id })),
    };

    match result {
        Ok(body) => body.to_string(),
        Err(e) => error_response(e.code(), &e.to_string()),
    }
}

fn job_row(job: &Job) -> Value {
    json!({
        "job_id": job.id,
        "mode": job.mode.to_string(),
        "message": job.message,
        "schedule": job.schedule.summary(),
        "next_fire_at": job.next_fire_at.map(|t| t.to_rfc3339()),
        "status": job.status.to_string(),
    })
}

fn error_response(code: &str, message: &str) -> String {
    json!({ "ok": false, "error": code, "message": message }).to_string()
}
