// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Upload persistence and structural metadata extraction.
//!
//! Metadata extraction is best-effort: a file the extractor cannot make
//! sense of still uploads fine, it just contributes fewer hints to the
//! system prompt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;

use hearth_core::AttachmentMeta;

/// Persist one uploaded file under `uploads/{username}/{session_id}/` and
/// return its metadata.
pub fn save_upload(
    uploads_dir: &Path,
    username: &str,
    session_id: &str,
    file_name: &str,
    bytes: &[u8],
) -> std::io::Result<(PathBuf, AttachmentMeta)> {
    // Strip any path components a hostile client embedded in the name.
    let safe_name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());

    let dir = uploads_dir.join(username).join(session_id);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(&safe_name);
    std::fs::write(&path, bytes)?;

    let file_type = Path::new(&safe_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let meta = AttachmentMeta {
        name: safe_name,
        size: bytes.len() as u64,
        extra: extract_metadata(&file_type, bytes),
        file_type,
    };
    Ok((path, meta))
}

/// Structure hints by file type: row/column counts for tabular data, line
/// counts for text, top-level shape for JSON.
fn extract_metadata(file_type: &str, bytes: &[u8]) -> BTreeMap<String, serde_json::Value> {
    let mut extra = BTreeMap::new();
    let Ok(text) = std::str::from_utf8(bytes) else {
        return extra;
    };
    match file_type {
        "csv" => {
            let mut lines = text.lines();
            let columns = lines
                .next()
                .map(|header| header.split(',').count())
                .unwrap_or(0);
            // Data rows exclude the header line.
            let rows = text.lines().count().saturating_sub(1);
            extra.insert("rows".into(), json!(rows));
            extra.insert("columns".into(), json!(columns));
        }
        "json" => {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(text) {
                match v {
                    serde_json::Value::Object(map) => {
                        extra.insert("structure".into(), json!("object"));
                        extra.insert("keys".into(), json!(map.len()));
                    }
                    serde_json::Value::Array(arr) => {
                        extra.insert("structure".into(), json!("array"));
                        extra.insert("items".into(), json!(arr.len()));
                    }
                    _ => {
                        extra.insert("structure".into(), json!("scalar"));
                    }
                }
            }
        }
        _ => {
            extra.insert("lines".into(), json!(text.lines().count()));
        }
    }
    extra
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_metadata_counts_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let (path, meta) = save_upload(
            dir.path(),
            "alice",
            "s1",
            "sales.csv",
            b"name,region,total\na,EU,10\nb,US,20",
        )
        .unwrap();
        assert!(path.exists());
        assert_eq!(meta.file_type, "csv");
        assert_eq!(meta.extra["rows"], json!(2));
        assert_eq!(meta.extra["columns"], json!(3));
    }

    #[test]
    fn json_metadata_reports_structure() {
        let dir = tempfile::tempdir().unwrap();
        let (_, meta) = save_upload(
            dir.path(),
            "alice",
            "s1",
            "config.json",
            br#"{"a": 1, "b": 2}"#,
        )
        .unwrap();
        assert_eq!(meta.extra["structure"], json!("object"));
        assert_eq!(meta.extra["keys"], json!(2));
    }

    #[test]
    fn text_metadata_counts_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (_, meta) =
            save_upload(dir.path(), "alice", "s1", "notes.txt", b"one\ntwo\nthree").unwrap();
        assert_eq!(meta.extra["lines"], json!(3));
    }

    #[test]
    fn binary_content_yields_no_hints_but_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, meta) =
            save_upload(dir.path(), "alice", "s1", "blob.bin", &[0u8, 159, 146, 150]).unwrap();
        assert!(meta.extra.is_empty());
        assert_eq!(meta.size, 4);
    }

    #[test]
    fn path_components_in_names_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let (path, meta) =
            save_upload(dir.path(), "alice", "s1", "../../etc/passwd", b"x").unwrap();
        assert_eq!(meta.name, "passwd");
        assert!(path.starts_with(dir.path().join("alice").join("s1")));
    }
}
