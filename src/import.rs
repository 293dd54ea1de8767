//! Import files and directories into a vault.
//!
//! Walks a directory tree, applies include/exclude glob patterns, and
//! imports every matching UTF-8 file as a document whose source is the
//! path relative to the walk root and whose title is the file name.
//!
//! Default excludes (always applied):
//! - `**/.git/**`
//! - `**/target/**`
//! - `**/node_modules/**`
//!
//! Files are imported in sorted relative-path order so repeated imports
//! of the same tree produce the same audit sequence.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::vault::Vault;

/// Outcome of [`import_path`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// `(source, document id)` per imported file.
    pub imported: Vec<(String, String)>,
    /// Files that were matched but not imported, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Import a single file with `title` (default: its file name).
pub fn import_file(vault: &mut Vault, path: &Path, title: Option<&str>) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let source = path.display().to_string();
    Ok(vault.import_text(&text, title.unwrap_or(&name), &source)?)
}

/// Import every matching file under `root`.
///
/// An empty `include` list matches all files. Unreadable or non-UTF-8
/// files are skipped and reported; vault errors abort the import.
pub fn import_path(
    vault: &mut Vault,
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<ImportReport> {
    if !root.is_dir() {
        bail!("Import root is not a directory: {}", root.display());
    }

    let include_set = if include.is_empty() {
        build_globset(&["**/*".to_string()])?
    } else {
        build_globset(include)?
    };

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort();

    let mut report = ImportReport::default();
    for (source, path) in files {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %source, error = %e, "skipping file that is not UTF-8 text");
                report.skipped.push((source, e.to_string()));
                continue;
            }
        };
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source.clone());
        let id = vault
            .import_text(&text, &title, &source)
            .with_context(|| format!("Failed to import {}", source))?;
        report.imported.push((source, id));
    }

    Ok(report)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
