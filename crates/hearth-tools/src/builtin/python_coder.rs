// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Instruction-driven Python executor.
//!
//! The instruction is turned into code by a tool-internal model call (the
//! existing workspace scripts are provided as context so follow-up
//! instructions can build on earlier ones), written into the per-session
//! scratch directory and executed there with `python3`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use hearth_model::{ChatMessage, ChatRequest};

use crate::tool::{Tool, ToolContext, ToolResult};

pub struct PythonCoderTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for PythonCoderTool {
    fn name(&self) -> &str {
        "python_coder"
    }

    fn description(&self) -> &str {
        "Carry out a computation or data task by generating and running Python code. \
         Give a precise natural-language instruction; the code runs in the session \
         workspace, where earlier scripts and their output files persist. Returns \
         stdout, stderr, exit code, wall time and the workspace file listing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "What the code should do"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (default 120)"
                }
            },
            "required": ["instruction"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(instruction) = args.get("instruction").and_then(|v| v.as_str()) else {
            return ToolResult::err("instruction is required");
        };
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);
        let Some(backend) = ctx.backend.clone() else {
            return ToolResult::err("no model backend wired for code generation");
        };

        let workspace = ctx.scratch_dir();
        if let Err(e) = std::fs::create_dir_all(&workspace) {
            return ToolResult::err(format!("cannot create workspace: {e}"));
        }

        // Generate the code with the existing scripts as context.
        let existing = existing_scripts(&workspace);
        let prompt = generation_prompt(instruction, &existing);
        debug!(
            instruction_len = instruction.len(),
            existing = existing.len(),
            "python_coder generating code"
        );
        let response = backend
            .chat(ChatRequest {
                messages: vec![ChatMessage::user(prompt)],
                model: ctx.model.clone(),
                temperature: 0.1,
                session_id: ctx.session_id.clone(),
                phase: "python_coder",
                ..Default::default()
            })
            .await;
        let code = match response {
            Ok(r) => extract_code(r.content.as_deref().unwrap_or("")),
            Err(e) => return ToolResult::err(format!("code generation failed: {e}")),
        };
        if code.trim().is_empty() {
            return ToolResult::err("code generation produced no code");
        }

        let script_name = format!("script_{}.py", existing.len() + 1);
        let script_path = workspace.join(&script_name);
        if let Err(e) = std::fs::write(&script_path, &code) {
            return ToolResult::err(format!("cannot write script: {e}"));
        }

        // Execute.
        let start = Instant::now();
        let mut cmd = Command::new("python3");
        cmd.arg(&script_name)
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(Duration::from_secs(timeout), cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolResult::err(format!("python spawn error: {e}")),
            Err(_) => {
                return ToolResult::err_with(
                    format!("python execution timed out after {timeout}s"),
                    json!({ "script": script_name, "timed_out": true }),
                )
            }
        };
        let duration = start.elapsed().as_secs_f64();

        let exit_code = output.status.code().unwrap_or(-1);
        let fields = json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": exit_code,
            "duration": (duration * 100.0).round() / 100.0,
            "script": script_name,
            "files": workspace_files(&workspace),
        });
        if exit_code == 0 {
            ToolResult::ok(fields)
        } else {
            ToolResult::err_with(format!("script exited with code {exit_code}"), fields)
        }
    }
}

fn existing_scripts(workspace: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(workspace)
        .map(|rd| {
            rd.flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| n.ends_with(".py"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn generation_prompt(instruction: &str, existing: &[String]) -> String {
    let mut prompt = String::from(
        "Generate executable Python code for the instruction below.\n\n",
    );
    if !existing.is_empty() {
        prompt.push_str(&format!(
            "Existing workspace scripts (outputs from earlier steps are in the \
             current directory): {}\n\n",
            existing.join(", ")
        ));
    }
    prompt.push_str(&format!(
        "Instruction: {instruction}\n\n\
         Rules:\n\
         - Use only the standard library unless the instruction says otherwise\n\
         - Write any output files into the current directory\n\
         - Print the result to stdout\n\n\
         Output ONLY the complete Python code."
    ));
    prompt
}

/// Strip an optional Markdown code fence from a generation response.
fn extract_code(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```python").or_else(|| trimmed.strip_prefix("```")) {
        let inner = rest.strip_suffix("```").unwrap_or(rest);
        return inner.trim().to_string();
    }
    // Fenced block somewhere inside prose.
    if let Some(start) = trimmed.find("```python") {
        let after = &trimmed[start + "```python".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Name → size map of everything in the workspace.
fn workspace_files(workspace: &std::path::Path) -> BTreeMap<String, u64> {
    std::fs::read_dir(workspace)
        .map(|rd| {
            rd.flatten()
                .filter_map(|e| {
                    let name = e.file_name().into_string().ok()?;
                    let size = e.metadata().ok()?.len();
                    Some((name, size))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
