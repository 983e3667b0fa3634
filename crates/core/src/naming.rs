//! Output naming conventions.
//!
//! Generates destination folder names from checkpoint names or LoRA stacks,
//! renamed image filenames from the batch label, generation and sequence
//! index, and collision-free variants of a name within a destination folder.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::ExtractedParameters;
use crate::error::RelocateError;

/// Folder for images without an identifiable model.
pub const NO_BASE_MODEL: &str = "NO_BASE_MODEL";

/// Folder for images without LoRAs when bucketing by LoRA stack.
pub const NO_LORAS: &str = "NO_LORAS";

/// Longest LoRA-stack folder name kept verbatim. Longer names are cut and
/// suffixed with a digest of the full name.
pub const MAX_STACK_FOLDER_LENGTH: usize = 80;

/// Hex digits of the digest appended to a shortened folder name.
const STACK_DIGEST_LENGTH: usize = 8;

/// Bucket for non-image files swept at the end of a run.
pub const MISC_FOLDER: &str = "Other Files";

/// Folder holding generated text reports.
pub const REPORT_FOLDER: &str = "Gen Data";

/// Highest numeric suffix tried before giving up on a unique name.
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Destination folder name for a primary checkpoint.
///
/// Convention: basename of the checkpoint path (either separator), with
/// the extension stripped and every character other than ASCII
/// alphanumerics and `-_.` removed. Empty results fall back to
/// [`NO_BASE_MODEL`].
///
/// # Examples
///
/// ```
/// use gensort_core::naming::folder_name_for;
///
/// assert_eq!(folder_name_for(Some("X.safetensors")), "X");
/// assert_eq!(folder_name_for(Some("SDXL\\juggernaut XL v9.safetensors")), "juggernautXLv9");
/// assert_eq!(folder_name_for(None), "NO_BASE_MODEL");
/// ```
pub fn folder_name_for(primary_checkpoint: Option<&str>) -> String {
    let sanitized = primary_checkpoint.map(model_stem).unwrap_or_default();
    if sanitized.is_empty() {
        NO_BASE_MODEL.to_string()
    } else {
        sanitized
    }
}

/// How images are bucketed into destination folders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketMode {
    /// One folder per primary checkpoint.
    #[default]
    Checkpoint,
    /// One folder per distinct set of LoRAs, ignoring the checkpoint.
    LoraStack,
}

impl BucketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::LoraStack => "lora_stack",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "checkpoint" => Some(Self::Checkpoint),
            "lora_stack" | "lora" => Some(Self::LoraStack),
            _ => None,
        }
    }
}

impl std::fmt::Display for BucketMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination folder for an image under `mode`.
pub fn bucket_folder(mode: BucketMode, params: &ExtractedParameters) -> String {
    match mode {
        BucketMode::Checkpoint => folder_name_for(params.primary_checkpoint.as_deref()),
        BucketMode::LoraStack => {
            lora_stack_folder_name(params.loras.iter().map(|l| l.name.as_str()))
        }
    }
}

/// Folder name for a set of LoRAs.
///
/// Each name is reduced like a checkpoint name, then the distinct results
/// are sorted and joined with `_and_`. Order, duplicates and strengths do
/// not matter. No usable names gives [`NO_LORAS`].
///
/// # Examples
///
/// ```
/// use gensort_core::naming::lora_stack_folder_name;
///
/// assert_eq!(
///     lora_stack_folder_name(["loras/detail.safetensors", "add_light.pt"]),
///     "add_light_and_detail"
/// );
/// assert_eq!(lora_stack_folder_name([]), "NO_LORAS");
/// ```
pub fn lora_stack_folder_name<'a, I>(lora_names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stems: Vec<String> = lora_names
        .into_iter()
        .map(model_stem)
        .filter(|s| !s.is_empty())
        .collect();
    stems.sort();
    stems.dedup();

    if stems.is_empty() {
        return NO_LORAS.to_string();
    }
    let joined = stems.join("_and_");
    if joined.len() <= MAX_STACK_FOLDER_LENGTH {
        return joined;
    }

    let digest = format!("{:x}", Sha256::digest(joined.as_bytes()));
    // Sanitized names are ASCII, so byte slicing is safe.
    let keep = MAX_STACK_FOLDER_LENGTH - STACK_DIGEST_LENGTH - 1;
    format!("{}_{}", &joined[..keep], &digest[..STACK_DIGEST_LENGTH])
}

/// Basename of a model path with the extension stripped, keeping only
/// ASCII alphanumerics and `-_.`. May be empty.
fn model_stem(name: &str) -> String {
    // Basename, accepting Windows separators on any host
    let basename = name.rsplit(['/', '\\']).next().unwrap_or(name);

    // Strip the extension, keeping dotfiles intact
    let stem = match basename.rfind('.') {
        Some(idx) if idx > 0 => &basename[..idx],
        _ => basename,
    };

    stem.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Renamed image filename.
///
/// Convention: `[{label}] Gen {generation:02} ${sequence:04}.{extension}`
///
/// # Examples
///
/// ```
/// use gensort_core::naming::renamed_filename;
///
/// assert_eq!(renamed_filename("Portraits", 3, 17, "png"), "[Portraits] Gen 03 $0017.png");
/// ```
pub fn renamed_filename(label: &str, generation: u32, sequence: u32, extension: &str) -> String {
    let mut name = format!("[{label}] Gen {generation:02} ${sequence:04}");
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

/// Split a filename into stem and suffix; the suffix keeps its leading dot
/// and is empty when there is no extension.
pub fn split_filename(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Find a filename in `dir` that collides neither for the image itself nor
/// for any of its sidecars (given as suffixes such as `".txt"`).
///
/// Tries `filename` first, then `{stem}_1{ext}`, `{stem}_2{ext}`, ... up to
/// [`MAX_COLLISION_SUFFIX`]. Not atomic against concurrent writers.
pub fn resolve_unique_name(
    dir: &Path,
    filename: &str,
    sidecar_suffixes: &[String],
) -> Result<String, RelocateError> {
    let (stem, ext) = split_filename(filename);

    let is_free = |candidate_stem: &str| {
        !dir.join(format!("{candidate_stem}{ext}")).exists()
            && sidecar_suffixes
                .iter()
                .all(|s| !dir.join(format!("{candidate_stem}{s}")).exists())
    };

    if is_free(stem) {
        return Ok(filename.to_string());
    }
    for suffix in 1..=MAX_COLLISION_SUFFIX {
        let candidate = format!("{stem}_{suffix}");
        if is_free(&candidate) {
            tracing::debug!(original = filename, suffix, "Resolved filename collision");
            return Ok(format!("{candidate}{ext}"));
        }
    }
    Err(RelocateError::NameExhausted(filename.to_string()))
}
