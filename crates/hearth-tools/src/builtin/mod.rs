// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod file_navigator;
pub mod file_reader;
pub mod file_writer;
pub mod memory;
pub mod python_coder;
pub mod rag;
pub mod shell_exec;
pub mod websearch;

use std::path::{Path, PathBuf};

use crate::tool::ToolContext;

/// Resolve a model-supplied path for reading.
///
/// Absolute paths are used as given.  Relative paths are tried against the
/// session scratch directory, then the user's upload directory, then the
/// process working directory — the order a user most likely means.
pub(crate) fn resolve_read_path(path: &str, ctx: &ToolContext) -> PathBuf {
    let target = Path::new(path);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    let scratch = ctx.scratch_dir().join(target);
    if scratch.exists() {
        return scratch;
    }
    let upload = ctx.uploads_dir().join(target);
    if upload.exists() {
        return upload;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(target))
        .unwrap_or_else(|_| target.to_path_buf())
}

/// Resolve a model-supplied path for writing: absolute paths pass through,
/// relative paths land in the session scratch directory.
pub(crate) fn resolve_write_path(path: &str, ctx: &ToolContext) -> PathBuf {
    let target = Path::new(path);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        ctx.scratch_dir().join(target)
    }
}
