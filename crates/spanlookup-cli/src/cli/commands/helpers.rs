//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::Context;

use spanlookup::Document;

/// Read a JSON document; an unnamed document takes its file stem as name.
pub fn read_document(path: &Path) -> anyhow::Result<Document> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut doc: Document = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse document {}", path.display()))?;
    if doc.name.is_empty() {
        doc.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(doc)
}

/// Where the processed copy of `input` goes.
pub fn output_path(input: &Path, out_dir: Option<&Path>) -> PathBuf {
    match (out_dir, input.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => input.to_path_buf(),
    }
}

pub fn write_document(doc: &Document, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
