// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::Parser;

/// Self-hosted LLM agent runtime.
///
/// Serves an OpenAI-compatible chat endpoint backed by a local inference
/// server, with native tool calling, background jobs and per-session
/// persistence.
#[derive(Debug, Parser)]
#[command(name = "hearth", version, about)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override the listen address (e.g. 127.0.0.1:8080).
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}
