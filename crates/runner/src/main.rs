//! `gensort-runner` -- batch sorter for ComfyUI PNG output.
//!
//! Reads the workflow embedded in every PNG of a source directory, groups
//! images by checkpoint and LoRA set, numbers the groups as generations,
//! and reorganizes the batch into per-model (or per-LoRA-stack) folders
//! with renamed files, text reports and an "Other Files" bucket.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default           | Description                          |
//! |------------------------|----------|-------------------|--------------------------------------|
//! | `SORT_SOURCE_DIR`      | yes      | --                | Directory holding the batch          |
//! | `SORT_LABEL`           | yes      | --                | Label embedded in renamed files      |
//! | `SORT_OUTPUT_DIR`      | no       | `<source>/sorted` | Output root                          |
//! | `SORT_MOVE_FILES`      | no       | `false`           | Move instead of copy                 |
//! | `SORT_BUCKET_MODE`     | no       | `checkpoint`      | `checkpoint` or `lora_stack` folders |
//! | `SORT_RETAIN_OUTPUT`   | no       | `false`           | Keep an existing output root         |
//! | `SORT_WRITE_REPORTS`   | no       | `true`            | Write the `Gen Data` reports         |
//! | `SORT_EXTRACT_WORKERS` | no       | `4`               | Concurrent extraction tasks (1..=64) |

use gensort_core::stats::SUMMARY_MAX_LISTED;
use gensort_runner::config::SortConfig;
use gensort_runner::pipeline::{run_batch, PipelineError};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status after an interrupted run.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gensort_runner=info,gensort_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SortConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        source = %config.source_dir.display(),
        output = %config.output_root.display(),
        label = %config.label,
        mode = %config.transfer_mode,
        buckets = %config.bucket_mode,
        "Starting gensort-runner",
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling batch");
            on_interrupt.cancel();
        }
    });

    let progress = |completed: usize, total: usize, item: &str| {
        tracing::debug!(completed, total, item, "Progress");
    };

    match run_batch(&config, progress, &cancel).await {
        Ok(outcome) => {
            for line in outcome.statistics.summary(SUMMARY_MAX_LISTED).lines() {
                tracing::info!("{line}");
            }
            if outcome.interrupted {
                tracing::warn!("Run was interrupted; remaining source files form a new batch");
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
        Err(PipelineError::Cancelled) => {
            tracing::warn!("Batch cancelled; no files were changed");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            tracing::error!(error = %e, "Batch failed");
            std::process::exit(1);
        }
    }
}
