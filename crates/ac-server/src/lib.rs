//! ac-server: HTTP API and background conversion processing.
//!
//! - Axum HTTP API for submitting conversions, polling status, and fetching
//!   converted files
//! - Bounded queue drained by a concurrency-limited conversion processor
//! - Periodic retention sweep of finished tasks and their outputs
//! - Graceful shutdown via signal handling

pub mod context;
pub mod conversion_processor;
pub mod downloader;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod retention;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ac_core::config::Config;

use crate::context::AppContext;
use crate::conversion_processor::ConversionJob;

/// Handles to the background services started by [`spawn_services`].
pub struct Services {
    pub processor: JoinHandle<()>,
    pub retention: JoinHandle<()>,
}

impl Services {
    /// Wait for both services to stop. Cancel `ctx.shutdown` first.
    pub async fn join(self) {
        let _ = tokio::join!(self.processor, self.retention);
    }
}

/// Spawn the conversion processor and the retention sweeper. Both stop
/// when `ctx.shutdown` is cancelled.
pub fn spawn_services(ctx: &AppContext, jobs: mpsc::Receiver<ConversionJob>) -> Services {
    let processor_ctx = ctx.clone();
    let processor_cancel = ctx.shutdown.clone();
    let processor = tokio::spawn(async move {
        conversion_processor::run_conversion_processor(processor_ctx, jobs, processor_cancel)
            .await;
    });

    let retention = retention::start_retention_task(
        ctx.registry.clone(),
        ctx.config.server.output_dir.clone(),
        ctx.config.retention.clone(),
        ctx.shutdown.clone(),
    );

    Services {
        processor,
        retention,
    }
}

/// Start the audioconv server.
///
/// Discovers ffmpeg, builds the [`AppContext`], spawns the background
/// services, and serves HTTP until a shutdown signal arrives.
pub async fn start(config: Config) -> ac_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }
    config.ensure_usable()?;

    let output_dir = &config.server.output_dir;
    if !output_dir.exists() {
        std::fs::create_dir_all(output_dir)?;
        tracing::info!("Created output directory {}", output_dir.display());
    }

    let tools = ac_av::ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!(
                "Tool not found: {}; conversion requests will be rejected",
                info.name
            );
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ac_core::Error::Config(format!("Invalid server address: {e}")))?;

    let cancel = CancellationToken::new();
    let (ctx, jobs) = AppContext::new(config, tools, cancel.clone())?;
    let services = spawn_services(&ctx, jobs);

    let app = router::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ac_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Signal background tasks to stop and let in-flight conversions record
    // their final state.
    cancel.cancel();
    services.join().await;

    served.map_err(|e| ac_core::Error::Internal(format!("Server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT, SIGTERM, or `cancel`.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
