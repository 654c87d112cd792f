// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Root of all persisted state.  Every other on-disk location is derived
    /// from this via [`Config::paths`].
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP server.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on non-public routes.  When unset, optional-auth
    /// mode is active and unauthenticated requests run as user `guest`.
    pub auth_token: Option<String>,
    /// Allowed CORS origins.  Empty list means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Whether CORS responses include `Access-Control-Allow-Credentials`.
    #[serde(default)]
    pub cors_credentials: bool,
    /// Upper bound for a single multipart upload body, in bytes.
    #[serde(default = "default_upload_max_bytes")]
    pub upload_max_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

fn default_upload_max_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
            cors_origins: Vec::new(),
            cors_credentials: false,
            upload_max_bytes: default_upload_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible inference server, ending before
    /// `/chat/completions` (e.g. `http://127.0.0.1:8081/v1`).
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Model id forwarded to the backend when the request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Sampling temperature used when the request does not supply one.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Per-request timeout in seconds for backend HTTP calls.  Streaming
    /// reads are not bounded by this once the response has started.
    #[serde(default = "default_backend_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8081/v1".into()
}

fn default_model() -> String {
    "local-model".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_backend_timeout() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            request_timeout_secs: default_backend_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool-calling iterations per run.  The next model call after
    /// the cap is made without tools and terminates the run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Tool messages from earlier iterations longer than this many chars are
    /// replaced with a one-line summary after each iteration completes.
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold_chars: usize,
    /// Path of the base system prompt file.  Loaded once at startup into the
    /// prompt cache; `reload_prompt_cache` re-reads it.
    pub system_prompt_path: Option<PathBuf>,
    /// Days a session may sit idle before the startup sweep removes it.
    #[serde(default = "default_session_gc_days")]
    pub session_gc_days: i64,
    /// Days a finished job document is kept before the startup sweep removes it.
    #[serde(default = "default_job_gc_days")]
    pub job_gc_days: i64,
}

fn default_max_iterations() -> u32 {
    8
}

fn default_compress_threshold() -> usize {
    200
}

fn default_session_gc_days() -> i64 {
    30
}

fn default_job_gc_days() -> i64 {
    7
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            compress_threshold_chars: default_compress_threshold(),
            system_prompt_path: None,
            session_gc_days: default_session_gc_days(),
            job_gc_days: default_job_gc_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default serialized-result budget in chars; results larger than the
    /// budget are truncated and spilled to the overflow directory.
    #[serde(default = "default_result_budget")]
    pub default_result_budget: usize,
    /// Per-tool budget overrides, keyed by tool name.
    #[serde(default)]
    pub result_budgets: std::collections::HashMap<String, usize>,
    /// Default timeout in seconds for `shell_exec`.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Default timeout in seconds for `python_coder` script execution.
    #[serde(default = "default_python_timeout")]
    pub python_timeout_secs: u64,
    /// Web search provider API key.  Falls back to the `SEARCH_API_KEY`
    /// environment variable when unset.
    pub websearch_api_key: Option<String>,
}

fn default_result_budget() -> usize {
    8_000
}

fn default_shell_timeout() -> u64 {
    30
}

fn default_python_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_result_budget: default_result_budget(),
            result_budgets: Default::default(),
            shell_timeout_secs: default_shell_timeout(),
            python_timeout_secs: default_python_timeout(),
            websearch_api_key: None,
        }
    }
}

impl ToolsConfig {
    /// Budget for one tool's serialized result, honouring per-tool overrides.
    pub fn budget_for(&self, tool: &str) -> usize {
        self.result_budgets
            .get(tool)
            .copied()
            .unwrap_or(self.default_result_budget)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of keys one user may store.
    #[serde(default = "default_memory_max_entries")]
    pub max_entries: usize,
    /// Values longer than this are clipped on write.
    #[serde(default = "default_memory_max_value_len")]
    pub max_value_len: usize,
}

fn default_memory_max_entries() -> usize {
    100
}

fn default_memory_max_value_len() -> usize {
    2_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_memory_max_entries(),
            max_value_len: default_memory_max_value_len(),
        }
    }
}

/// Every on-disk location the runtime touches, derived from `data_dir`.
///
/// Handing this struct around (rather than the whole `Config`) keeps tools
/// and stores independent of configuration concerns they do not have.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub db_file: PathBuf,
    pub sessions_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub tool_results_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub rag_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub prompt_log_file: PathBuf,
    pub stop_file: PathBuf,
}

impl Config {
    pub fn paths(&self) -> DataPaths {
        let root = self.data_dir.clone();
        DataPaths {
            db_file: root.join("app.db"),
            sessions_dir: root.join("sessions"),
            jobs_dir: root.join("jobs"),
            memory_dir: root.join("memory"),
            tool_results_dir: root.join("tool_results"),
            uploads_dir: root.join("uploads"),
            scratch_dir: root.join("scratch"),
            rag_dir: root.join("rag"),
            logs_dir: root.join("logs"),
            prompt_log_file: root.join("logs").join("prompts.log"),
            stop_file: root.join("STOP"),
            root,
        }
    }
}

impl DataPaths {
    /// Create every directory the runtime writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.root,
            &self.sessions_dir,
            &self.jobs_dir,
            &self.memory_dir,
            &self.tool_results_dir,
            &self.uploads_dir,
            &self.scratch_dir,
            &self.rag_dir,
            &self.logs_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let c = Config::default();
        assert_eq!(c.agent.max_iterations, 8);
        assert_eq!(c.agent.compress_threshold_chars, 200);
        assert_eq!(c.backend.default_temperature, 0.7);
        assert_eq!(c.tools.shell_timeout_secs, 30);
    }

    #[test]
    fn budget_for_uses_override_then_default() {
        let mut t = ToolsConfig::default();
        t.result_budgets.insert("websearch".into(), 123);
        assert_eq!(t.budget_for("websearch"), 123);
        assert_eq!(t.budget_for("shell_exec"), t.default_result_budget);
    }

    #[test]
    fn paths_derive_from_data_dir() {
        let mut c = Config::default();
        c.data_dir = PathBuf::from("/tmp/hearth-test");
        let p = c.paths();
        assert_eq!(p.db_file, PathBuf::from("/tmp/hearth-test/app.db"));
        assert_eq!(p.stop_file, PathBuf::from("/tmp/hearth-test/STOP"));
        assert_eq!(
            p.prompt_log_file,
            PathBuf::from("/tmp/hearth-test/logs/prompts.log")
        );
    }

    #[test]
    fn yaml_round_trip_preserves_overrides() {
        let yaml = "
backend:
  base_url: http://10.0.0.2:9000/v1
  default_model: qwen2.5-32b
agent:
  max_iterations: 4
";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.backend.base_url, "http://10.0.0.2:9000/v1");
        assert_eq!(c.agent.max_iterations, 4);
        // Unset sections fall back to defaults.
        assert_eq!(c.tools.default_result_budget, 8_000);
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.agent.max_iterations, 8);
        assert_eq!(c.data_dir, PathBuf::from("data"));
    }
}
