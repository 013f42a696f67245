use std::sync::Arc;

use tracing::info;

mod commands;
mod console;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_daemon=info,chime_cron=info".into()),
        )
        .init();

    // load config: explicit path via CHIME_CONFIG > ~/.chime/chime.toml
    let config_path = std::env::var("CHIME_CONFIG").ok();
    let config = chime_core::ChimeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        chime_core::ChimeConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    // WAL keeps the file readable (sqlite3 CLI, backups) while the store writes.
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    let store = chime_cron::JobStore::new(db)?;
    let (engine, handle) = chime_cron::SchedulerEngine::new(
        store,
        Arc::new(console::ConsoleNotifier),
        Arc::new(console::ConsoleExecutor),
        config.scheduler.max_concurrent_dispatches,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!("chime daemon ready — reading JSON commands from stdin");
    run_command_loop(&handle).await?;

    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    info!("chime daemon stopped");
    Ok(())
}

/// Read one JSON command per stdin line until EOF or Ctrl-C.
async fn run_command_loop(handle: &chime_cron::SchedulerHandle) -> anyhow::Result<()> {
    use tokio::io::AsyncBufReadExt;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        println!("{}", commands::handle_line(handle, line));
                    }
                }
                None => break, // stdin closed
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
