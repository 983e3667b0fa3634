//! Staged batch pipeline.
//!
//! Extraction runs on a bounded pool of blocking tasks and is collected in
//! input order. Grouping, generation assignment and every filesystem change
//! then run sequentially, because generation numbers depend on the full set
//! of signatures and collision resolution shares folder state.
//!
//! Cancellation before reorganization leaves the filesystem untouched.
//! Cancellation during reorganization stops between images, so an image
//! and its sidecars are never split, and skips reports and the sweep.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use gensort_core::classifier::{extract_parameters, ExtractedParameters};
use gensort_core::error::{CoreError, ExtractError};
use gensort_core::extractor::extract_workflow;
use gensort_core::generation::{
    assign_generations, version_key, GenerationAssignment, NONE_GENERATION,
};
use gensort_core::inventory::scan_source;
use gensort_core::naming::{bucket_folder, renamed_filename, split_filename, REPORT_FOLDER};
use gensort_core::reorganize::{relocate_image, sweep_miscellaneous, FileRecord, SidecarIndex};
use gensort_core::report::write_reports;
use gensort_core::signature::{group_signature, GroupSignature};
use gensort_core::stats::{BatchStatistics, FailureKind};

use crate::config::{output_contains_source, SortConfig};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Batch cancelled before reorganization; no files were changed")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Everything a finished (or interrupted) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub output_root: PathBuf,
    pub records: Vec<FileRecord>,
    pub assignment: GenerationAssignment,
    pub statistics: BatchStatistics,
    /// Set when cancellation stopped reorganization part way.
    pub interrupted: bool,
}

/// One image that survived extraction and will be relocated.
struct Candidate {
    path: PathBuf,
    file_name: String,
    signature: GroupSignature,
    parameters: ExtractedParameters,
}

type Extracted = (PathBuf, Result<ExtractedParameters, ExtractError>);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run one batch end to end.
///
/// `progress` is called once per image with `(completed, total, file_name)`
/// during extraction and again during reorganization.
pub async fn run_batch<F>(
    config: &SortConfig,
    mut progress: F,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, PipelineError>
where
    F: FnMut(usize, usize, &str),
{
    let inventory = scan_source(&config.source_dir)?;
    let sidecars = SidecarIndex::build(&inventory.others);
    let mut stats = BatchStatistics::new(inventory.targets.len());

    tracing::info!(
        source = %config.source_dir.display(),
        images = inventory.targets.len(),
        other_files = inventory.others.len(),
        workers = config.extract_workers,
        "Batch started"
    );

    // Stage 1: extraction
    let extracted = extract_all(
        &inventory.targets,
        config.extract_workers,
        &mut progress,
        cancel,
    )
    .await?;

    // Stage 2: grouping
    let mut candidates = Vec::with_capacity(extracted.len());
    for (path, result) in extracted {
        stats.record_extraction(&path, &result);
        let parameters = match result {
            Ok(parameters) => parameters,
            Err(ExtractError::NotFound) => ExtractedParameters::default(),
            Err(e @ ExtractError::Corrupt { .. }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt metadata, sorting without it"
                );
                ExtractedParameters::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Image excluded from this run");
                continue;
            }
        };
        candidates.push(Candidate {
            file_name: file_name_of(&path),
            signature: group_signature(&parameters),
            path,
            parameters,
        });
    }

    // Stage 3: generation assignment
    let assignment = assign_generations(candidates.iter().map(|c| &c.signature));
    candidates.sort_by(|a, b| {
        version_key(a.signature.as_str())
            .total_cmp(&version_key(b.signature.as_str()))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    tracing::info!(
        images = candidates.len(),
        generations = assignment.len(),
        "Generations assigned"
    );

    if cancel.is_cancelled() {
        tracing::warn!("Batch cancelled before reorganization");
        return Err(PipelineError::Cancelled);
    }

    // Stage 4: reorganization
    prepare_output_root(config)?;

    let total = candidates.len();
    let mut records = Vec::with_capacity(total);
    let mut interrupted = false;

    for (index, candidate) in candidates.into_iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::warn!(completed = index, total, "Batch cancelled during reorganization");
            interrupted = true;
            break;
        }

        let sequence = index as u32 + 1;
        let generation = assignment
            .generation_of(&candidate.signature)
            .unwrap_or(NONE_GENERATION);
        let folder = bucket_folder(config.bucket_mode, &candidate.parameters);
        let (_, suffix) = split_filename(&candidate.file_name);
        let new_name = renamed_filename(
            &config.label,
            generation,
            sequence,
            suffix.trim_start_matches('.'),
        );

        match relocate_image(
            &candidate.path,
            sidecars.sidecars_of(&candidate.path),
            &config.output_root.join(&folder),
            &new_name,
            config.transfer_mode,
        ) {
            Ok(moved) => {
                stats.relocated += 1;
                stats.sidecars_relocated += moved.sidecars.len();
                if moved.created_folder {
                    stats.folders_created += 1;
                }
                for failure in &moved.sidecar_failures {
                    stats.record_failure(
                        &failure.path,
                        FailureKind::Sidecar,
                        failure.reason.clone(),
                    );
                }
                records.push(FileRecord {
                    original_filename: candidate.file_name.clone(),
                    original_path: candidate.path,
                    new_filename: moved.file_name(),
                    generation,
                    signature: candidate.signature,
                    folder,
                    sidecars: moved.sidecars.into_iter().map(|(_, to)| to).collect(),
                    parameters: candidate.parameters,
                });
            }
            Err(e) => {
                tracing::warn!(path = %candidate.path.display(), error = %e, "Image not relocated");
                stats.record_failure(&candidate.path, FailureKind::Relocation, e.to_string());
            }
        }

        progress(index + 1, total, &candidate.file_name);
    }

    if !interrupted {
        // Stage 5: reports
        if config.write_reports {
            let gen_data = config.output_root.join(REPORT_FOLDER);
            match write_reports(&gen_data, &records) {
                Ok(report) => {
                    stats.reports_written += report.written;
                    for (path, reason) in report.failures {
                        stats.record_failure(&path, FailureKind::Output, reason);
                    }
                }
                Err(e) => stats.record_failure(&gen_data, FailureKind::Output, e.to_string()),
            }
        }

        // Stage 6: miscellaneous sweep, always last
        let skip = sidecars.claimed_by(&inventory.targets);
        match sweep_miscellaneous(
            &config.source_dir,
            &config.output_root,
            config.transfer_mode,
            &skip,
        ) {
            Ok(sweep) => {
                stats.misc_files += sweep.relocated.len();
                for (path, reason) in sweep.failures {
                    stats.record_failure(&path, FailureKind::Output, reason);
                }
            }
            Err(e) => stats.record_failure(&config.source_dir, FailureKind::Output, e.to_string()),
        }
    }

    tracing::info!(
        relocated = stats.relocated,
        failed = stats.failed(),
        interrupted,
        "Batch finished"
    );

    Ok(BatchOutcome {
        output_root: config.output_root.clone(),
        records,
        assignment,
        statistics: stats,
        interrupted,
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Extract and classify every target on the blocking pool, at most
/// `workers` at a time, yielding results in input order.
async fn extract_all<F>(
    targets: &[PathBuf],
    workers: usize,
    progress: &mut F,
    cancel: &CancellationToken,
) -> Result<Vec<Extracted>, PipelineError>
where
    F: FnMut(usize, usize, &str),
{
    let total = targets.len();
    let mut stream = futures::stream::iter(targets.iter().cloned())
        .map(|path| async move {
            let task_path = path.clone();
            let joined = tokio::task::spawn_blocking(move || extract_one(&task_path)).await;
            let result = joined.unwrap_or_else(|e| {
                Err(ExtractError::Io(std::io::Error::other(format!(
                    "extraction task failed: {e}"
                ))))
            });
            (path, result)
        })
        .buffered(workers.max(1));

    let mut results = Vec::with_capacity(total);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(
                    completed = results.len(),
                    total,
                    "Batch cancelled during extraction"
                );
                return Err(PipelineError::Cancelled);
            }
            next = stream.next() => match next {
                Some((path, result)) => {
                    progress(results.len() + 1, total, &file_name_of(&path));
                    results.push((path, result));
                }
                None => break,
            },
        }
    }
    Ok(results)
}

/// The graph is dropped here; only the parameter record leaves the task.
fn extract_one(path: &Path) -> Result<ExtractedParameters, ExtractError> {
    let graph = extract_workflow(path)?;
    Ok(extract_parameters(&graph))
}

/// Create the output root, clearing it first unless existing output is
/// retained. An output root that contains the source is never cleared.
fn prepare_output_root(config: &SortConfig) -> Result<(), CoreError> {
    let output_root = &config.output_root;
    if !config.retain_existing && output_root.exists() {
        if output_contains_source(output_root, &config.source_dir) {
            return Err(CoreError::Validation(format!(
                "refusing to clear {} because it contains the source directory {}",
                output_root.display(),
                config.source_dir.display()
            )));
        }
        tracing::info!(path = %output_root.display(), "Clearing existing output");
        std::fs::remove_dir_all(output_root).map_err(|e| CoreError::io(output_root, e))?;
    }
    std::fs::create_dir_all(output_root).map_err(|e| CoreError::io(output_root, e))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
