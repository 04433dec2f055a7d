//! Periodic cleanup of finished tasks and their output files.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use ac_core::config::RetentionConfig;

use crate::registry::{TaskRegistry, TaskStatus};

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks_evicted: usize,
    pub files_removed: usize,
}

/// Evict expired tasks and, when `delete_outputs` is set, remove their
/// output files plus any stale untracked file left in `output_dir` by an
/// earlier run.
pub fn sweep(
    registry: &TaskRegistry,
    output_dir: &Path,
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> SweepReport {
    let evicted = registry.evict(config.task_ttl(), config.max_tasks, now);
    let mut report = SweepReport {
        tasks_evicted: evicted.len(),
        files_removed: 0,
    };

    if !config.delete_outputs {
        return report;
    }

    for task in evicted.iter().filter(|t| t.status == TaskStatus::Completed) {
        if remove_output(&output_dir.join(&task.output_file)) {
            report.files_removed += 1;
        }
    }

    report.files_removed += remove_stale_files(registry, output_dir, config, now);
    report
}

fn remove_output(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {e}", path.display());
            false
        }
    }
}

/// Untracked regular files whose mtime is past the TTL.
fn remove_stale_files(
    registry: &TaskRegistry,
    output_dir: &Path,
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> usize {
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("Failed to scan {}: {e}", output_dir.display());
            return 0;
        }
    };

    let Ok(ttl) = chrono::Duration::from_std(config.task_ttl()) else {
        return 0;
    };

    let tracked = registry.output_files();
    let mut removed = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if now - DateTime::<Utc>::from(modified) < ttl {
            continue;
        }

        if tracked.contains(entry.file_name().to_string_lossy().as_ref()) {
            continue;
        }
        if remove_output(&entry.path()) {
            tracing::debug!("Removed stale output {}", entry.path().display());
            removed += 1;
        }
    }
    removed
}

/// Spawn the retention sweeper. Runs until `cancel` fires.
pub fn start_retention_task(
    registry: Arc<TaskRegistry>,
    output_dir: std::path::PathBuf,
    config: RetentionConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let registry = registry.clone();
            let output_dir = output_dir.clone();
            let config = config.clone();
            let report = tokio::task::spawn_blocking(move || {
                sweep(&registry, &output_dir, &config, Utc::now())
            })
            .await;

            match report {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!(
                        tasks = report.tasks_evicted,
                        files = report.files_removed,
                        "Retention sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Retention sweep panicked: {e}"),
            }
        }

        tracing::debug!("Retention sweeper stopped");
    })
}
