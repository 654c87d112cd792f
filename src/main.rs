// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hearth_core::StopSignal;
use hearth_jobs::{JobRunner, JobStore};
use hearth_model::{InterceptedBackend, LlamaBackend, PromptLogger};
use hearth_server::AppState;
use hearth_store::{Database, HistoryStore, MemoryStore};
use hearth_tools::standard_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Cli::parse();
    let mut config = hearth_config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let paths = config.paths();
    paths.ensure_dirs().context("creating data directories")?;

    hearth_core::init_prompt_cache(config.agent.system_prompt_path.as_deref());
    let stop = StopSignal::init(paths.stop_file.clone());

    // Stores.
    let db = Database::open(&paths.db_file).context("opening metadata database")?;
    let history = Arc::new(HistoryStore::new(paths.sessions_dir.clone()));
    let memory = Arc::new(MemoryStore::new(
        paths.memory_dir.clone(),
        config.memory.max_entries,
        config.memory.max_value_len,
    ));
    let jobs = Arc::new(JobStore::new(paths.jobs_dir.clone()));

    // Startup sweeps: idle sessions (with their documents) and old jobs.
    for session_id in db.gc_sessions(config.agent.session_gc_days).await? {
        history.delete(&session_id);
    }
    jobs.gc(config.agent.job_gc_days);

    // Model backend, wrapped with the prompt-log interceptor.
    let llama = LlamaBackend::from_config(&config.backend);
    let logger = Arc::new(PromptLogger::new(paths.prompt_log_file.clone()));
    let backend: Arc<dyn hearth_model::ChatBackend> =
        Arc::new(InterceptedBackend::new(Arc::new(llama), logger));

    let registry = Arc::new(standard_registry(&config.tools));
    let runner = JobRunner::new(Arc::clone(&jobs), db.clone(), Arc::clone(&history));

    let state = AppState {
        config: Arc::new(config.clone()),
        paths,
        backend,
        registry,
        db,
        history,
        memory,
        jobs,
        runner,
        stop,
    };

    let router = hearth_server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(
        bind = %config.server.bind,
        backend = %config.backend.base_url,
        model = %config.backend.default_model,
        "hearth listening"
    );
    axum::serve(listener, router).await?;
    Ok(())
}
