//! Shared application context.
//!
//! [`AppContext`] is handed to every route handler via Axum state and to the
//! background processor. Everything inside is either immutable or
//! internally synchronized, so cloning it is cheap.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ac_av::{AudioTarget, ToolRegistry};
use ac_core::config::Config;

use crate::conversion_processor::{ConversionJob, ConversionQueue};
use crate::downloader::Downloader;
use crate::registry::TaskRegistry;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub registry: Arc<TaskRegistry>,
    pub downloader: Downloader,
    pub target: Arc<AudioTarget>,
    pub queue: ConversionQueue,
    /// Root token; every task token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Build the context and the receiving end of its job queue, which the
    /// caller hands to [`crate::conversion_processor::run_conversion_processor`].
    pub fn new(
        config: Config,
        tools: ToolRegistry,
        shutdown: CancellationToken,
    ) -> ac_core::Result<(Self, mpsc::Receiver<ConversionJob>)> {
        let downloader = Downloader::new(&config.conversion)?;
        let target = AudioTarget::from_config(&config.conversion);
        let (queue, jobs) = ConversionQueue::channel(config.conversion.queue_capacity);

        let ctx = Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            registry: Arc::new(TaskRegistry::new()),
            downloader,
            target: Arc::new(target),
            queue,
            shutdown,
        };
        Ok((ctx, jobs))
    }

    /// Public retrieval URL for an output file.
    pub fn file_url(&self, file_name: &str) -> String {
        format!(
            "{}/files/{}",
            self.config.server.public_url.trim_end_matches('/'),
            file_name
        )
    }
}
