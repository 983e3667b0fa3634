//! Source directory inventory.
//!
//! Splits the top level of a batch directory into target images (the only
//! files that carry an embedded workflow) and everything else. Hidden and
//! system files are left alone entirely.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Constants ────────────────────────────────────────────────────────

/// Extensions treated as primary images (case-insensitive).
pub const TARGET_EXTENSIONS: &[&str] = &["png"];

// ── Types ────────────────────────────────────────────────────────────

/// How a file in the source directory is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Primary image: extracted, renamed and bucketed.
    Target,
    /// Anything else: a sidecar or a miscellaneous file.
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level regular files of a source directory, each list sorted by
/// file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInventory {
    pub targets: Vec<PathBuf>,
    pub others: Vec<PathBuf>,
}

impl SourceInventory {
    pub fn total(&self) -> usize {
        self.targets.len() + self.others.len()
    }
}

// ── Functions ────────────────────────────────────────────────────────

/// Derive a file kind from its extension.
pub fn kind_of(path: &Path) -> FileKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if TARGET_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Target
    } else {
        FileKind::Other
    }
}

/// Returns `true` if the file name represents a hidden or system file.
pub fn is_hidden_or_system(file_name: &str) -> bool {
    file_name.starts_with('.') || file_name == "Thumbs.db" || file_name == "desktop.ini"
}

/// List the top-level regular files of `dir`. Subdirectories are not
/// descended into.
pub fn scan_source(dir: &Path) -> Result<SourceInventory, CoreError> {
    let mut inventory = SourceInventory::default();

    for path in list_regular_files(dir)? {
        match kind_of(&path) {
            FileKind::Target => inventory.targets.push(path),
            FileKind::Other => inventory.others.push(path),
        }
    }

    tracing::debug!(
        dir = %dir.display(),
        targets = inventory.targets.len(),
        others = inventory.others.len(),
        "Scanned source directory"
    );
    Ok(inventory)
}

/// Visible top-level regular files of `dir`, sorted by file name.
pub fn list_regular_files(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let entries = fs::read_dir(dir).map_err(|e| CoreError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| CoreError::io(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(is_hidden_or_system) {
            continue;
        }
        files.push(entry.path());
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

// ── Tests ────────────────────────────────────────────────────────────
