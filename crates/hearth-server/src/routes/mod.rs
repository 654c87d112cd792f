// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod admin;
pub mod chat;
pub mod health;
pub mod jobs;
pub mod models;
pub mod sessions;

#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;

    use hearth_core::StopSignal;
    use hearth_jobs::{JobRunner, JobStore};
    use hearth_model::ScriptedBackend;
    use hearth_store::{Database, HistoryStore, MemoryStore};
    use hearth_tools::standard_registry;

    use crate::state::AppState;

    /// Build a full [`AppState`] over a scripted backend and a throwaway data
    /// directory.  The directory is intentionally leaked for the lifetime of
    /// the test process.
    pub fn app_state_with(tweak: impl FnOnce(&mut hearth_config::Config)) -> AppState {
        let dir = tempfile::tempdir().unwrap().into_path();
        let mut config = hearth_config::Config::default();
        config.data_dir = dir;
        tweak(&mut config);
        let paths = config.paths();
        paths.ensure_dirs().unwrap();
        hearth_core::init_prompt_cache(config.agent.system_prompt_path.as_deref());

        let backend = Arc::new(ScriptedBackend::always_text("scripted reply"));
        let db = Database::open_in_memory().unwrap();
        let history = Arc::new(HistoryStore::new(paths.sessions_dir.clone()));
        let memory = Arc::new(MemoryStore::new(
            paths.memory_dir.clone(),
            config.memory.max_entries,
            config.memory.max_value_len,
        ));
        let jobs = Arc::new(JobStore::new(paths.jobs_dir.clone()));
        let runner = JobRunner::new(Arc::clone(&jobs), db.clone(), Arc::clone(&history));
        let stop = StopSignal::new(paths.stop_file.clone());

        AppState {
            registry: Arc::new(standard_registry(&config.tools)),
            config: Arc::new(config),
            paths,
            backend,
            db,
            history,
            memory,
            jobs,
            runner,
            stop,
        }
    }

    pub fn app_state() -> AppState {
        app_state_with(|_| {})
    }
}
