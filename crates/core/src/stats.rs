//! Batch statistics.
//!
//! An explicit aggregate threaded through the pipeline stages and returned
//! to the caller. Per-image failures land here instead of aborting the
//! batch.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Default number of failures enumerated in [`BatchStatistics::summary`].
pub const SUMMARY_MAX_LISTED: usize = 10;

/// Category of a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Embedded field present but unparseable. The image is still sorted.
    Corrupt,
    /// Container unreadable. The image is left in place.
    Io,
    /// Extraction aborted on size limits. The image is left in place.
    ResourceExhausted,
    /// Image transfer failed.
    Relocation,
    /// Sidecar transfer failed; its image was still relocated.
    Sidecar,
    /// A report or miscellaneous file could not be written or moved.
    Output,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Corrupt => "corrupt",
            Self::Io => "io",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Relocation => "relocation",
            Self::Sidecar => "sidecar",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Target images found in the source directory.
    pub total: usize,
    /// Images whose extraction finished, with or without metadata.
    pub processed: usize,
    /// Images with a parsed workflow.
    pub succeeded: usize,
    pub no_metadata: usize,
    pub corrupt: usize,
    pub io_failures: usize,
    pub resource_exhausted: usize,
    pub relocated: usize,
    pub relocation_failures: usize,
    pub sidecars_relocated: usize,
    pub sidecar_failures: usize,
    pub misc_files: usize,
    pub reports_written: usize,
    pub folders_created: usize,
    pub failures: Vec<FailureEntry>,
}

impl BatchStatistics {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Count one extraction outcome. Failures are also recorded as entries.
    pub fn record_extraction<T>(&mut self, path: &Path, result: &Result<T, ExtractError>) {
        self.processed += 1;
        match result {
            Ok(_) => self.succeeded += 1,
            Err(ExtractError::NotFound) => self.no_metadata += 1,
            Err(e @ ExtractError::Corrupt { .. }) => {
                self.record_failure(path, FailureKind::Corrupt, e.to_string())
            }
            Err(e @ ExtractError::Io(_)) => {
                self.record_failure(path, FailureKind::Io, e.to_string())
            }
            Err(e @ ExtractError::ResourceExhausted { .. }) => {
                self.record_failure(path, FailureKind::ResourceExhausted, e.to_string())
            }
        }
    }

    /// Record a failure entry and bump its counter.
    pub fn record_failure(&mut self, path: &Path, kind: FailureKind, reason: impl Into<String>) {
        match kind {
            FailureKind::Corrupt => self.corrupt += 1,
            FailureKind::Io => self.io_failures += 1,
            FailureKind::ResourceExhausted => self.resource_exhausted += 1,
            FailureKind::Relocation => self.relocation_failures += 1,
            FailureKind::Sidecar => self.sidecar_failures += 1,
            FailureKind::Output => {}
        }
        self.failures.push(FailureEntry {
            path: path.to_path_buf(),
            kind,
            reason: reason.into(),
        });
    }

    /// Number of failure entries of any kind.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Share of processed images with a parsed workflow, in percent.
    pub fn success_rate_percent(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.processed as f64
    }

    pub fn counts_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.failures {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Human-readable end-of-run summary listing at most `max_listed`
    /// failures.
    pub fn summary(&self, max_listed: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Processed {}/{} images: {} with metadata, {} without, {} failed ({:.1}% success)",
            self.processed,
            self.total,
            self.succeeded,
            self.no_metadata,
            self.failed(),
            self.success_rate_percent()
        );
        let _ = writeln!(
            out,
            "Relocated {} images and {} sidecars into {} new folders; {} other files; {} reports",
            self.relocated,
            self.sidecars_relocated,
            self.folders_created,
            self.misc_files,
            self.reports_written
        );

        for (kind, count) in self.counts_by_kind() {
            let _ = writeln!(out, "  {kind}: {count}");
        }
        for entry in self.failures.iter().take(max_listed) {
            let name = entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.path.display().to_string());
            let _ = writeln!(out, "  - {name} [{}]: {}", entry.kind, entry.reason);
        }
        if self.failures.len() > max_listed {
            let _ = writeln!(out, "  ... and {} more", self.failures.len() - max_listed);
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowGraph;

    fn io_error() -> ExtractError {
        ExtractError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated"))
    }

    #[test]
    fn extraction_outcomes_are_counted_by_kind() {
        let mut stats = BatchStatistics::new(4);
        stats.record_extraction(
            Path::new("a.png"),
            &Ok::<_, ExtractError>(WorkflowGraph::default()),
        );
        stats.record_extraction::<()>(Path::new("b.png"), &Err(ExtractError::NotFound));
        stats.record_extraction::<()>(
            Path::new("c.png"),
            &Err(ExtractError::Corrupt {
                field: "prompt".into(),
                reason: "bad json".into(),
            }),
        );
        stats.record_extraction::<()>(Path::new("d.png"), &Err(io_error()));

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.no_metadata, 1);
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.io_failures, 1);
        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.success_rate_percent(), 25.0);
    }

    #[test]
    fn not_found_is_not_a_failure() {
        let mut stats = BatchStatistics::new(1);
        stats.record_extraction::<()>(Path::new("a.png"), &Err(ExtractError::NotFound));
        assert!(stats.failures.is_empty());
    }

    #[test]
    fn empty_batch_has_zero_success_rate() {
        assert_eq!(BatchStatistics::default().success_rate_percent(), 0.0);
    }

    #[test]
    fn counts_by_kind_groups_entries() {
        let mut stats = BatchStatistics::default();
        stats.record_failure(Path::new("a.txt"), FailureKind::Sidecar, "denied");
        stats.record_failure(Path::new("b.txt"), FailureKind::Sidecar, "denied");
        stats.record_failure(Path::new("c.png"), FailureKind::Relocation, "denied");

        let counts = stats.counts_by_kind();
        assert_eq!(counts[&FailureKind::Sidecar], 2);
        assert_eq!(counts[&FailureKind::Relocation], 1);
        assert_eq!(stats.sidecar_failures, 2);
        assert_eq!(stats.relocation_failures, 1);
    }

    #[test]
    fn summary_lists_first_failures_only() {
        let mut stats = BatchStatistics::new(12);
        for i in 0..12 {
            stats.record_failure(
                Path::new(&format!("/src/img{i:02}.png")),
                FailureKind::Io,
                "unreadable",
            );
        }

        let summary = stats.summary(SUMMARY_MAX_LISTED);
        assert!(summary.contains("  io: 12"));
        assert!(summary.contains("img00.png [io]: unreadable"));
        assert!(summary.contains("img09.png"));
        assert!(!summary.contains("img10.png"));
        assert!(summary.ends_with("... and 2 more"));
    }

    #[test]
    fn serializes_for_report_layers() {
        let mut stats = BatchStatistics::new(1);
        stats.record_failure(Path::new("x.png"), FailureKind::ResourceExhausted, "too big");
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["resource_exhausted"], 1);
        assert_eq!(json["failures"][0]["kind"], "resource_exhausted");
    }
}
