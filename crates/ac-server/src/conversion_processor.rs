//! Background conversion processor.
//!
//! Submissions are pushed onto a bounded [`ConversionQueue`]. The processor
//! pulls jobs off it and runs at most `max_concurrent` of them at once, each
//! under the task timeout and its own cancellation token. Every job ends in
//! exactly one registry transition: `completed` or `failed`.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use ac_av::Workspace;
use ac_core::{Error, Result, TaskId};

use crate::context::AppContext;
use crate::downloader;
use crate::registry::{Task, TaskRegistry};

/// One unit of work for the processor.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub task_id: TaskId,
    pub url: Url,
    pub output_file: String,
    cancel: CancellationToken,
}

impl ConversionJob {
    pub fn for_task(task: &Task, url: Url) -> Self {
        Self {
            task_id: task.id,
            url,
            output_file: task.output_file.clone(),
            cancel: task.cancel_token().clone(),
        }
    }
}

/// Sending half of the bounded job queue.
#[derive(Debug, Clone)]
pub struct ConversionQueue {
    tx: mpsc::Sender<ConversionJob>,
}

impl ConversionQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConversionJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. A full or closed queue is
    /// [`Error::Unavailable`].
    pub fn submit(&self, job: ConversionJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Unavailable("conversion queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Unavailable("conversion processor is shutting down".into())
            }
        })
    }

    /// Jobs currently waiting for a worker slot.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Run the processor until `cancel` fires or every queue sender is gone.
///
/// On shutdown, queued jobs are failed as cancelled and in-flight jobs are
/// awaited so each records its final state.
pub async fn run_conversion_processor(
    ctx: AppContext,
    mut jobs: mpsc::Receiver<ConversionJob>,
    cancel: CancellationToken,
) {
    let max_concurrent = ctx.config.conversion.max_concurrent.max(1);
    let slots = Arc::new(Semaphore::new(max_concurrent));
    let mut running = JoinSet::new();

    tracing::info!(max_concurrent, "Conversion processor started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Cancelled while queued; the registry already has its final state.
        let finished = ctx
            .registry
            .get(job.task_id)
            .map_or(true, |t| t.status.is_terminal());
        if job.cancel.is_cancelled() && finished {
            tracing::debug!(task_id = %job.task_id, "Skipping cancelled job");
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abandon(&ctx, &job);
                break;
            }
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    abandon(&ctx, &job);
                    break;
                }
            },
        };

        let task_ctx = ctx.clone();
        running.spawn(async move {
            let _permit = permit;
            process_job(&task_ctx, job).await;
        });

        while running.try_join_next().is_some() {}
    }

    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        abandon(&ctx, &job);
    }
    while running.join_next().await.is_some() {}

    tracing::info!("Conversion processor stopped");
}

/// Fail a job that never got to run.
fn abandon(ctx: &AppContext, job: &ConversionJob) {
    if ctx.registry.fail(job.task_id, &Error::Cancelled.to_string()).is_ok() {
        tracing::info!(task_id = %job.task_id, "Queued conversion abandoned at shutdown");
    }
}

/// Run one job to its terminal state.
async fn process_job(ctx: &AppContext, job: ConversionJob) {
    let task_id = job.task_id;
    let timeout = ctx.config.conversion.task_timeout();

    tracing::info!(task_id = %task_id, url = %job.url, "Processing conversion");

    let prepared = tokio::select! {
        _ = job.cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, execute_conversion(ctx, &job)) => match result {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "conversion did not finish within {}s",
                timeout.as_secs()
            ))),
        },
    };

    // Publishing always runs to completion. A cancel that lands meanwhile
    // is resolved when the outcome is recorded.
    let outcome = match prepared {
        Ok(workspace) => publish(workspace, ctx.config.server.output_dir.clone()).await,
        Err(e) => Err(e),
    };

    record_outcome(&ctx.registry, task_id, outcome).await;
}

/// Download and transcode into a scratch workspace. Scratch files are
/// removed when the workspace drops, whatever the outcome.
async fn execute_conversion(ctx: &AppContext, job: &ConversionJob) -> Result<Workspace> {
    let workspace = Workspace::new(
        ctx.config.server.work_dir.as_deref(),
        &downloader::input_file_name(&job.url),
        &job.output_file,
    )?;

    let bytes = ctx
        .downloader
        .fetch_to_file(&job.url, &workspace.input())
        .await?;
    tracing::debug!(task_id = %job.task_id, bytes, "Source downloaded");

    ac_av::transcode_audio(
        &ctx.tools,
        &workspace.input(),
        &workspace.output(),
        &ctx.target,
        ctx.config.conversion.task_timeout(),
    )
    .await?;

    Ok(workspace)
}

/// Move the transcoded output into `output_dir`.
async fn publish(workspace: Workspace, output_dir: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || workspace.finalize(&output_dir))
        .await
        .map_err(|e| Error::Internal(format!("finalize task panicked: {e}")))?
}

/// Apply the single terminal transition for `task_id`. A published file
/// whose task already finished (cancelled mid-publish) is deleted.
async fn record_outcome(registry: &TaskRegistry, task_id: TaskId, outcome: Result<PathBuf>) {
    match outcome {
        Ok(path) => match registry.complete(task_id) {
            Ok(_) => {
                tracing::info!(task_id = %task_id, output = %path.display(), "Conversion completed");
            }
            Err(e) => {
                tracing::debug!(task_id = %task_id, "Discarding finished output: {e}");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Failed to remove {}: {e}", path.display());
                }
            }
        },
        Err(e) => {
            let detail = e.to_string();
            match registry.fail(task_id, &detail) {
                Ok(_) if matches!(e, Error::Cancelled) => {
                    tracing::info!(task_id = %task_id, "Conversion cancelled");
                }
                Ok(_) => {
                    tracing::error!(task_id = %task_id, error = %detail, "Conversion failed");
                }
                Err(conflict) => {
                    tracing::debug!(task_id = %task_id, "Failure not recorded: {conflict}");
                }
            }
        }
    }
}
