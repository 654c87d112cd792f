// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use hearth_model::{ChatMessage, Role};

/// How many chars of the original result survive in the summary line.
const SUMMARY_PREFIX_CHARS: usize = 100;

/// Hot-tail context compression (microcompaction, stage 2).
///
/// Tool messages *before* `boundary` (the start of the current iteration)
/// whose content exceeds `threshold` chars are replaced with a one-line
/// summary.  The current iteration's tool messages stay full-size — the model
/// still needs them verbatim; older results only need to be recognisable.
///
/// Idempotent: an already-summarised message carries its own marker prefix
/// and is skipped on later passes.
pub fn compress_old_iterations(
    messages: &mut [ChatMessage],
    boundary: usize,
    threshold: usize,
) -> usize {
    let mut compressed = 0;
    for msg in messages.iter_mut().take(boundary) {
        if msg.role != Role::Tool {
            continue;
        }
        let Some(content) = msg.content.as_deref() else {
            continue;
        };
        if content.len() <= threshold {
            continue;
        }
        let tool_name = msg.name.as_deref().unwrap_or("tool");
        let marker = format!("[{tool_name} result — ");
        if content.starts_with(&marker) {
            continue;
        }
        let head: String = content
            .chars()
            .take(SUMMARY_PREFIX_CHARS)
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        msg.content = Some(format!("{marker}{head}...]"));
        compressed += 1;
    }
    compressed
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
