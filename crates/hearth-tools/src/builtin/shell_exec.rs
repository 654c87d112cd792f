// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Byte cap per stream returned to the model.
const MAX_STREAM_BYTES: usize = 50 * 1024;

pub struct ShellExecTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, exit code and duration.\n\
         On timeout the process KEEPS RUNNING: you get the partial output and the \
         process id, and can wait longer (re-check with another command) or kill it \
         yourself (kill <pid>). Commands run in the session workspace by default. \
         Multiple shell_exec calls in one turn run concurrently."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run (bash -c)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds to wait before returning partial output (default 30)"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Working directory (default: session workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::err("command is required");
        };
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);
        let cwd = match args.get("working_directory").and_then(|v| v.as_str()) {
            Some(dir) => std::path::PathBuf::from(dir),
            None => ctx.scratch_dir(),
        };
        if let Err(e) = std::fs::create_dir_all(&cwd) {
            return ToolResult::err(format!("cannot create working directory: {e}"));
        }

        debug!(cmd = %command, timeout, "shell_exec");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // New session: the child has no controlling terminal and survives the
        // timeout path as its own process group.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("spawn error: {e}")),
        };
        let pid = child.id();

        // Readers accumulate into shared buffers so that partial output is
        // available at the moment a timeout fires, not only at EOF.
        let stdout_buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let stdout_task = spawn_reader(child.stdout.take(), Arc::clone(&stdout_buf));
        let stderr_task = spawn_reader(child.stderr.take(), Arc::clone(&stderr_buf));

        match tokio::time::timeout(Duration::from_secs(timeout), child.wait()).await {
            Ok(Ok(status)) => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let stdout = take_text(&stdout_buf).await;
                let stderr = take_text(&stderr_buf).await;
                let code = status.code().unwrap_or(-1);
                let duration = start.elapsed().as_secs_f64();
                let fields = json!({
                    "stdout": stdout,
                    "stderr": stderr,
                    "exit_code": code,
                    "duration": (duration * 100.0).round() / 100.0,
                    "command": command,
                });
                if code == 0 {
                    ToolResult::ok(fields)
                } else {
                    ToolResult::err_with(format!("command exited with code {code}"), fields)
                }
            }
            Ok(Err(e)) => ToolResult::err(format!("wait error: {e}")),
            Err(_) => {
                // Deliberately no kill: the model decides whether to wait
                // longer or terminate the process by pid.  A detached task
                // reaps the child whenever it does exit.
                let stdout = take_text(&stdout_buf).await;
                let stderr = take_text(&stderr_buf).await;
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                ToolResult::err_with(
                    format!("command still running after {timeout}s"),
                    json!({
                        "timed_out": true,
                        "pid": pid,
                        "stdout_partial": stdout,
                        "stderr_partial": stderr,
                        "duration": timeout,
                        "command": command,
                    }),
                )
            }
        }
    }
}

fn spawn_reader<R>(
    source: Option<R>,
    buf: Arc<Mutex<Vec<u8>>>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut source) = source else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = buf.lock().await;
                    if guard.len() < MAX_STREAM_BYTES {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

async fn take_text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let guard = buf.lock().await;
    let mut text = String::from_utf8_lossy(&guard).into_owned();
    if guard.len() >= MAX_STREAM_BYTES {
        text.push_str("\n...[truncated]");
    }
    text
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
