//! Plain-text generation reports written to the `Gen Data` folder.
//!
//! One file per image (`<new stem>.txt`), one per generation
//! (`GEN nn META.txt`) and a batch bundle (`ALL_GEN_METADATA_BUNDLE.txt`).
//! Reports left by an earlier run are never overwritten; a new report takes
//! the next free `_N` name instead.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::{ExtractedParameters, Polarity};
use crate::error::CoreError;
use crate::naming::{resolve_unique_name, split_filename};
use crate::reorganize::FileRecord;

/// Rendered text for an image without metadata.
pub const NO_METADATA_TEXT: &str = "No metadata found.";

/// File name of the batch-wide bundle.
pub const BUNDLE_FILENAME: &str = "ALL_GEN_METADATA_BUNDLE.txt";

/// Width of the rule under each generation header in the bundle.
const BUNDLE_RULE_WIDTH: usize = 30;

/// Outcome of [`write_reports`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub written: usize,
    /// Paths of the reports written, in write order.
    pub paths: Vec<PathBuf>,
    /// `(path, reason)` for every report that could not be written.
    pub failures: Vec<(PathBuf, String)>,
}

/// File name of the per-generation report.
pub fn generation_report_filename(generation: u32) -> String {
    format!("GEN {generation:02} META.txt")
}

/// Render one image's parameters as sectioned text.
pub fn render_parameters(params: &ExtractedParameters) -> String {
    if params.is_empty() {
        return NO_METADATA_TEXT.to_string();
    }

    let mut out = String::new();

    let mut models = Vec::new();
    if let Some(checkpoint) = &params.primary_checkpoint {
        models.push(format!("Base Model: {}", basename(checkpoint)));
    }
    if let Some(vae) = &params.vae {
        models.push(format!("VAE: {}", basename(vae)));
    }
    for other in params
        .checkpoints
        .iter()
        .filter(|c| Some(*c) != params.primary_checkpoint.as_ref())
    {
        models.push(format!("Also Loaded: {}", basename(other)));
    }
    section(&mut out, "MODELS", &models);

    if let Some(refiner) = &params.refiner {
        let mut lines = Vec::new();
        if let Some(model) = &refiner.model {
            lines.push(format!("Refiner Model: {}", basename(model)));
        }
        if let Some(base) = &refiner.base_model {
            lines.push(format!("Base Model: {}", basename(base)));
        }
        if let Some(switch) = refiner.switch_point {
            lines.push(format!("Switch At: {switch}"));
        }
        section(&mut out, "REFINER", &lines);
    }

    let loras: Vec<String> = params
        .loras
        .iter()
        .enumerate()
        .map(|(i, lora)| {
            format!(
                "LoRA {}: {} (Model: {}, CLIP: {})",
                i + 1,
                basename(&lora.name),
                optional(lora.model_strength),
                optional(lora.clip_strength)
            )
        })
        .collect();
    section(&mut out, "LORAS", &loras);

    let mut embeddings = Vec::new();
    for (polarity, heading) in [
        (Polarity::Positive, "Positive Embeddings:"),
        (Polarity::Negative, "Negative Embeddings:"),
    ] {
        let names: Vec<_> = params
            .embeddings
            .iter()
            .filter(|e| e.polarity == polarity)
            .collect();
        if names.is_empty() {
            continue;
        }
        embeddings.push(heading.to_string());
        embeddings.extend(names.iter().map(|e| format!("  - {}", basename(&e.name))));
    }
    section(&mut out, "EMBEDDINGS", &embeddings);

    if let Some(positive) = &params.prompts.positive {
        section(&mut out, "POSITIVE PROMPT", std::slice::from_ref(positive));
    }
    if let Some(negative) = &params.prompts.negative {
        section(&mut out, "NEGATIVE PROMPT", std::slice::from_ref(negative));
    }

    let s = &params.sampling;
    let sampling: Vec<String> = [
        ("Steps", s.steps.map(|v| v.to_string())),
        ("Cfg", s.cfg.map(|v| v.to_string())),
        ("Sampler Name", s.sampler_name.clone()),
        ("Scheduler", s.scheduler.clone()),
        ("Denoise", s.denoise.map(|v| v.to_string())),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
    .collect();
    section(&mut out, "SAMPLING PARAMETERS", &sampling);

    if let Some(image) = &params.image_params {
        let lines: Vec<String> = [
            ("Width", image.width),
            ("Height", image.height),
            ("Batch Size", image.batch_size),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
        .collect();
        section(&mut out, "IMAGE PARAMETERS", &lines);
    }

    let seeds: Vec<String> = params
        .seeds
        .iter()
        .map(|seed| format!("{}: {}", seed.class_type, seed.value))
        .collect();
    section(&mut out, "SEEDS", &seeds);

    let mut controlnets = Vec::new();
    for (i, cn) in params.controlnets.iter().enumerate() {
        controlnets.push(format!("ControlNet {}: {}", i + 1, cn.class_type));
        if let Some(model) = &cn.model {
            controlnets.push(format!("  Model: {}", basename(model)));
        }
        if let Some(strength) = cn.strength {
            controlnets.push(format!("  Strength: {strength}"));
        }
    }
    section(&mut out, "CONTROLNET", &controlnets);

    if let Some(up) = &params.upscaling {
        let mut lines = vec![format!("Node: {}", up.class_type)];
        if let Some(model) = &up.model {
            lines.push(format!("Model: {}", basename(model)));
        }
        if let Some(method) = &up.method {
            lines.push(format!("Method: {method}"));
        }
        if let Some(scale) = up.scale_by {
            lines.push(format!("Scale By: {scale}"));
        }
        section(&mut out, "UPSCALING", &lines);
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        NO_METADATA_TEXT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write every report for `records` into `gen_data_dir`.
///
/// Individual write failures are collected, not propagated; only failing
/// to create the folder itself is an error.
pub fn write_reports(
    gen_data_dir: &Path,
    records: &[FileRecord],
) -> Result<ReportOutcome, CoreError> {
    fs::create_dir_all(gen_data_dir).map_err(|e| CoreError::io(gen_data_dir, e))?;

    let mut outcome = ReportOutcome::default();
    let mut by_generation: BTreeMap<u32, Vec<String>> = BTreeMap::new();

    for record in records {
        let text = render_parameters(&record.parameters);
        let (stem, _) = split_filename(&record.new_filename);
        write_one(&mut outcome, gen_data_dir, &format!("{stem}.txt"), &text);
        by_generation.entry(record.generation).or_default().push(text);
    }

    for (generation, texts) in &by_generation {
        let name = generation_report_filename(*generation);
        write_one(&mut outcome, gen_data_dir, &name, &texts.join("\n\n"));
    }

    let mut bundle = String::new();
    for (generation, texts) in &by_generation {
        let _ = writeln!(bundle, "GEN {generation:02}");
        let _ = writeln!(bundle, "{}", "-".repeat(BUNDLE_RULE_WIDTH));
        bundle.push_str(&texts.join("\n\n"));
        bundle.push_str("\n\n");
    }
    write_one(&mut outcome, gen_data_dir, BUNDLE_FILENAME, &bundle);

    tracing::info!(
        dir = %gen_data_dir.display(),
        written = outcome.written,
        failed = outcome.failures.len(),
        "Reports written"
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn write_one(outcome: &mut ReportOutcome, dir: &Path, filename: &str, contents: &str) {
    let name = match resolve_unique_name(dir, filename, &[]) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(file = filename, error = %e, "Report not written");
            outcome.failures.push((dir.join(filename), e.to_string()));
            return;
        }
    };
    let path = dir.join(name);
    match fs::write(&path, contents) {
        Ok(()) => {
            outcome.written += 1;
            outcome.paths.push(path);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Report not written");
            outcome.failures.push((path, e.to_string()));
        }
    }
}

fn section(out: &mut String, title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "=== {title} ===");
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    out.push('\n');
}

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}
