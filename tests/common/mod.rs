//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] with a temporary output
//! directory, starts the background services, and serves the router on a
//! random port. ffmpeg is replaced by small shell scripts.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ac_av::ToolRegistry;
use ac_core::config::Config;
use ac_server::context::AppContext;
use ac_server::router::build_router;

/// Copies the `-i` input to the last argument, like a lossless transcode.
pub const FFMPEG_COPY: &str = r#"#!/bin/sh
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  output="$arg"
done
cp "$input" "$output"
"#;

/// Fails the way ffmpeg does on garbage input.
pub const FFMPEG_FAIL: &str = r#"#!/bin/sh
echo "ffmpeg version n6.1 Copyright (c) 2000-2023 the FFmpeg developers" >&2
echo "source: Invalid data found when processing input" >&2
exit 1
"#;

/// Never finishes on its own.
pub const FFMPEG_HANG: &str = "#!/bin/sh\nexec sleep 30\n";

pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    scratch: TempDir,
}

impl TestHarness {
    /// Serve with a fake ffmpeg running `script`.
    pub async fn with_ffmpeg(script: &str) -> Self {
        Self::with_ffmpeg_config(script, |_| {}).await
    }

    /// Serve with a fake ffmpeg and a config tweak.
    pub async fn with_ffmpeg_config(script: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        let ffmpeg = write_script(scratch.path(), "ffmpeg", script);
        let mut tools = ToolRegistry::empty();
        tools.insert("ffmpeg", ffmpeg);
        Self::start(scratch, tools, tweak).await
    }

    /// Serve with no ffmpeg available at all.
    pub async fn without_ffmpeg() -> Self {
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        Self::start(scratch, ToolRegistry::empty(), |_| {}).await
    }

    async fn start(scratch: TempDir, tools: ToolRegistry, tweak: impl FnOnce(&mut Config)) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let mut config = Config::default();
        config.server.public_url = format!("http://{addr}");
        config.server.output_dir = scratch.path().join("converted_files");
        config.server.work_dir = Some(scratch.path().join("work"));
        config.conversion.task_timeout_secs = 20;
        tweak(&mut config);
        std::fs::create_dir_all(&config.server.output_dir).expect("failed to create output dir");

        let (ctx, jobs) = AppContext::new(config, tools, CancellationToken::new())
            .expect("failed to build context");
        ac_server::spawn_services(&ctx, jobs);

        let app = build_router(ctx.clone());
        let shutdown = ctx.shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .ok();
        });

        Self {
            ctx,
            addr,
            client: reqwest::Client::new(),
            scratch,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.ctx.config.server.output_dir.clone()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.scratch.path().join("work")
    }

    /// POST /request-conversion/ and return the status code and body.
    pub async fn submit(&self, source_url: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let resp = self
            .client
            .post(self.url("/request-conversion/"))
            .json(&serde_json::json!({ "url": source_url }))
            .send()
            .await
            .expect("submit request failed");
        let status = resp.status();
        let body = resp.json().await.expect("submit body was not JSON");
        (status, body)
    }

    /// Submit and return the task id, asserting acceptance.
    pub async fn submit_ok(&self, source_url: &str) -> String {
        let (status, body) = self.submit(source_url).await;
        assert_eq!(status, 200, "submission rejected: {body}");
        body["task_id"].as_str().expect("missing task_id").to_string()
    }

    pub async fn status(&self, task_id: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let resp = self
            .client
            .get(self.url(&format!("/get-conversion-status/{task_id}")))
            .send()
            .await
            .expect("status request failed");
        let status = resp.status();
        let body = resp.json().await.expect("status body was not JSON");
        (status, body)
    }

    /// Poll until the task leaves `processing`.
    pub async fn wait_until_finished(&self, task_id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let (code, body) = self.status(task_id).await;
            assert_eq!(code, 200, "status lookup failed: {body}");
            if body["status"] != "processing" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {task_id} did not finish in time");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}

/// Write an executable script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}

/// Upstream host serving `body` at `path`.
pub async fn upstream_with(path: &str, body: &[u8]) -> wiremock::MockServer {
    use wiremock::matchers::{method, path as path_matcher};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_matcher(path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(&server)
        .await;
    server
}

/// Files left in `dir`, for leak checks.
pub fn list_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
