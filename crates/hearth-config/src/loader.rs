// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/hearth/config.yaml"));
    paths.push(PathBuf::from("/etc/hearth/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/hearth/config.yaml"));
        paths.push(home.join(".config/hearth/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from("hearth.yaml"));
    paths.push(PathBuf::from("hearth.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged configuration")?
    };
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "agent:\n  max_iterations: 3").unwrap();
        let c = load(Some(f.path())).unwrap();
        assert_eq!(c.agent.max_iterations, 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/hearth.yaml"))).is_err());
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: 2").unwrap();
        let src: serde_yaml::Value = serde_yaml::from_str("b: 3").unwrap();
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"], serde_yaml::Value::from(1));
        assert_eq!(dst["b"], serde_yaml::Value::from(3));
    }

    #[test]
    fn merge_nested_mappings() {
        let mut dst: serde_yaml::Value =
            serde_yaml::from_str("outer:\n  keep: 1\n  swap: 2").unwrap();
        let src: serde_yaml::Value = serde_yaml::from_str("outer:\n  swap: 9").unwrap();
        merge_yaml(&mut dst, src);
        assert_eq!(dst["outer"]["keep"], serde_yaml::Value::from(1));
        assert_eq!(dst["outer"]["swap"], serde_yaml::Value::from(9));
    }
}
