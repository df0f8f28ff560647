//! Bounded-deadline execution of the trace executable.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;
use crate::error::TraceError;

/// How long to keep draining the pipes after a kill. An orphaned
/// grandchild can hold the write end open forever; whatever was captured
/// by then is the partial output.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Runs the configured trace executable with a deadline.
#[derive(Debug, Clone)]
pub struct Tracer {
    core: String,
    limit: Duration,
}

impl Tracer {
    pub fn new(core: impl Into<String>, limit: Duration) -> Self {
        Self {
            core: core.into(),
            limit,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.trace_core, config.trace_timeout)
    }

    /// Run a trace against `target` with the given arguments placed before
    /// it. Returns the whitespace-trimmed combined stdout+stderr; on
    /// timeout or failure the partial output travels with the error.
    pub async fn run(&self, target: &str, params: &[String]) -> Result<String, TraceError> {
        let mut args: Vec<&str> = params.iter().map(String::as_str).collect();
        args.push(target);

        debug!(command = %self.core, args = ?args, "running trace");

        let mut child = Command::new(&self.core)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TraceError::ExecutionFailed {
                reason: e.to_string(),
                output: String::new(),
            })?;

        // Drain the pipes into shared buffers so a kill still leaves the
        // already-captured output readable. Interleaving is not preserved:
        // stdout comes first, then stderr.
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut out_task = tokio::spawn(drain_pipe(child.stdout.take(), Arc::clone(&stdout_buf)));
        let mut err_task = tokio::spawn(drain_pipe(child.stderr.take(), Arc::clone(&stderr_buf)));

        let status = match timeout(self.limit, child.wait()).await {
            Ok(wait_result) => Some(wait_result),
            Err(_) => {
                // Deadline hit: kill and reap before returning so no
                // zombie is left behind.
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        if status.is_some() {
            // Normal exit closes the pipes; wait for EOF.
            let _ = (&mut out_task).await;
            let _ = (&mut err_task).await;
        } else {
            let drain = async {
                let _ = (&mut out_task).await;
                let _ = (&mut err_task).await;
            };
            let _ = timeout(PIPE_GRACE, drain).await;
            out_task.abort();
            err_task.abort();
        }

        let mut output = String::from_utf8_lossy(&stdout_buf.lock().unwrap()).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr_buf.lock().unwrap()));
        let output = output.trim().to_string();

        match status {
            None => {
                debug!(limit = ?self.limit, output = %output, "trace timed out");
                Err(TraceError::Timeout {
                    limit: self.limit,
                    output,
                })
            }
            Some(Err(e)) => {
                debug!(error = %e, "trace wait failed");
                Err(TraceError::ExecutionFailed {
                    reason: e.to_string(),
                    output,
                })
            }
            Some(Ok(status)) if !status.success() => {
                debug!(%status, output = %output, "trace exited non-zero");
                Err(TraceError::ExecutionFailed {
                    reason: status.to_string(),
                    output,
                })
            }
            Some(Ok(_)) => {
                debug!(output = %output, "trace finished");
                Ok(output)
            }
        }
    }
}

async fn drain_pipe(pipe: Option<impl AsyncRead + Unpin>, buf: Arc<Mutex<Vec<u8>>>) {
    let Some(mut pipe) = pipe else { return };
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().unwrap().extend_from_slice(&chunk[..n]),
        }
    }
}
