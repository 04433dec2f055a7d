//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest stderr excerpt carried in an error message. ffmpeg prints a
/// large banner before the actual failure, which is always at the end.
const MAX_STDERR_TAIL: usize = 2048;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is killed if the returned future is dropped (cancellation) or
/// the timeout elapses.
///
/// # Example
///
/// ```no_run
/// use ac_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> ac_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .args(["-y", "-i", "in.mp3", "out.ogg"])
///     .execute()
///     .await?;
/// println!("{}", output.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`ac_core::Error::Tool`] if spawning the process fails.
    /// - [`ac_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes the tail of stderr).
    /// - [`ac_core::Error::Timeout`] if the process runs past the timeout.
    pub async fn execute(&self) -> ac_core::Result<ToolOutput> {
        let program_name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string());

        tracing::debug!(tool = %program_name, args = ?self.args, "Running external tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            ac_core::Error::tool(program_name.clone(), format!("failed to spawn: {e}"))
        })?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(ac_core::Error::tool(
                        program_name,
                        format!(
                            "exited with {}: {}",
                            output.status,
                            stderr_tail(tool_output.stderr.trim())
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(ac_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The child was moved into `wait_with_output`; dropping that
            // future here kills it (kill_on_drop).
            Err(_elapsed) => Err(ac_core::Error::Timeout(format!(
                "{program_name} did not finish within {:?}",
                self.timeout
            ))),
        }
    }
}

/// Last `MAX_STDERR_TAIL` bytes of `stderr`, cut on a char boundary.
pub fn stderr_tail(stderr: &str) -> &str {
    if stderr.len() <= MAX_STDERR_TAIL {
        return stderr;
    }
    let mut start = stderr.len() - MAX_STDERR_TAIL;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    &stderr[start..]
}
