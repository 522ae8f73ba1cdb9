//! The `memserve` command: mirror, serve, watch, until Ctrl+C.

use crate::cli::Cli;
use crate::config::ProjectConfig;
use crate::error::{Result, ResultExt};
use crate::mirror::{Mirror, SyncOutcome};
use crate::ui;
use crate::watcher::{DEBOUNCE, FileChange, FileWatcher, PendingChanges};
use memserve::DevServer;
use std::time::Duration;
use tokio::signal;
use tokio::time::{Instant, sleep_until};

/// Run the dev server for the parsed command line.
///
/// # Errors
///
/// Config, bind, TLS and watcher failures abort before serving starts.
pub async fn execute(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = ProjectConfig::load(&cli, &cwd)?;
    if let Some(file) = &project.file {
        ui::info(&format!("Using config {}", file.display()));
    }

    let source = project.settings.source.clone();
    let source = source
        .canonicalize()
        .with_path(&source)
        .with_hint("Build the project first, or pass its output directory as SOURCE")?;

    let server_config = project.to_server_config()?;
    let output_root = server_config.virtual_dir();
    if !server_config.mock.is_empty() || !server_config.proxy.is_empty() {
        ui::info(&format!(
            "{}, {}",
            ui::plural(server_config.mock.len(), "mock route"),
            ui::plural(server_config.proxy.len(), "proxy rule")
        ));
    }

    let server = DevServer::new(server_config)?;
    let mirror = Mirror::new(source.clone(), output_root, server.store());
    let stats = mirror.scan()?;
    ui::success(&format!(
        "Mirrored {} from {}",
        ui::plural(stats.written, "file"),
        source.display()
    ));

    let (watcher, mut changes) = FileWatcher::new(source)?;
    let running = server.listen().await?;
    ui::serving(&running.url());
    ui::info(&format!("Watching {}. Press Ctrl+C to stop", watcher.root().display()));

    let mut pending = PendingChanges::new(DEBOUNCE);
    loop {
        let deadline = pending.next_deadline();
        let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => pending.push(change, Instant::now()),
                None => {
                    ui::warning("File watcher stopped; no further changes will be picked up");
                    break;
                }
            },

            _ = sleep_until(wake), if deadline.is_some() => {
                for change in pending.take_due(Instant::now()) {
                    apply(&mirror, &change).await;
                }
            }

            _ = signal::ctrl_c() => {
                ui::info("Shutting down...");
                break;
            }
        }
    }

    drop(watcher);
    running.shutdown().await.context("Shutdown failed")?;
    ui::success("Server stopped");
    Ok(())
}

async fn apply(mirror: &Mirror, change: &FileChange) {
    match mirror.sync(change.path()).await {
        Ok(SyncOutcome::Written(files)) => {
            tracing::info!(path = %change.path().display(), files, "updated");
        }
        Ok(SyncOutcome::Removed(files)) => {
            tracing::info!(path = %change.path().display(), files, "removed");
        }
        Ok(SyncOutcome::Skipped) => {}
        Err(e) => ui::error(&format!("Failed to sync {}: {}", change.path().display(), e)),
    }
}
