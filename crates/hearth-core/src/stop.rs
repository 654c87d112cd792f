// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::info;

use crate::agent::AgentError;

/// Process-wide cooperative stop flag, backed by a sentinel file so an
/// out-of-band process (or an operator with `touch`) can set it.
///
/// One instance is created at startup and shared by every agent loop and the
/// admin routes.  The agent loop calls [`StopSignal::check`] at each
/// iteration boundary.
#[derive(Debug, Clone)]
pub struct StopSignal {
    stop_file: PathBuf,
}

impl StopSignal {
    pub fn new(stop_file: PathBuf) -> Self {
        Self { stop_file }
    }

    /// Startup hook: clear any flag left over from a previous run.
    pub fn init(stop_file: PathBuf) -> Self {
        let signal = Self::new(stop_file);
        if signal.is_requested() {
            info!("clearing stale stop flag from previous run");
            signal.clear();
        }
        signal
    }

    pub fn is_requested(&self) -> bool {
        self.stop_file.exists()
    }

    pub fn request(&self) {
        if let Some(parent) = self.stop_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.stop_file, "stop requested\n");
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.stop_file);
    }

    /// Raise [`AgentError::Cancelled`] when the flag is set.
    pub fn check(&self) -> Result<(), AgentError> {
        if self.is_requested() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
