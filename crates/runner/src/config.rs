use std::path::{Component, Path, PathBuf};

use gensort_core::naming::BucketMode;
use gensort_core::reorganize::TransferMode;

/// Default number of concurrent extraction workers.
pub const DEFAULT_EXTRACT_WORKERS: usize = 4;

/// Upper bound for `SORT_EXTRACT_WORKERS`.
pub const MAX_EXTRACT_WORKERS: usize = 64;

/// Longest accepted batch label, in characters.
pub const MAX_LABEL_LENGTH: usize = 64;

/// Output folder used when `SORT_OUTPUT_DIR` is unset, relative to the
/// source directory.
pub const DEFAULT_OUTPUT_SUBDIR: &str = "sorted";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Invalid batch label: {0}")]
    InvalidLabel(String),

    #[error("Output directory {output} must not contain the source directory {source_dir}")]
    OutputOverlapsSource { output: PathBuf, source_dir: PathBuf },
}

/// Batch configuration.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Directory holding the batch (top level only).
    pub source_dir: PathBuf,
    /// Root of the reorganized output.
    pub output_root: PathBuf,
    /// User label embedded in every renamed file.
    pub label: String,
    pub transfer_mode: TransferMode,
    /// Destination folders per checkpoint or per LoRA stack.
    pub bucket_mode: BucketMode,
    /// Keep an existing output root instead of clearing it first.
    pub retain_existing: bool,
    pub write_reports: bool,
    /// Concurrent extraction tasks (1..=64).
    pub extract_workers: usize,
}

impl SortConfig {
    /// Configuration with defaults for everything but the source and label.
    pub fn new(source_dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        let source_dir = source_dir.into();
        Self {
            output_root: source_dir.join(DEFAULT_OUTPUT_SUBDIR),
            source_dir,
            label: label.into(),
            transfer_mode: TransferMode::Copy,
            bucket_mode: BucketMode::Checkpoint,
            retain_existing: false,
            write_reports: true,
            extract_workers: DEFAULT_EXTRACT_WORKERS,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                | Default            |
    /// |------------------------|--------------------|
    /// | `SORT_SOURCE_DIR`      | required           |
    /// | `SORT_LABEL`           | required           |
    /// | `SORT_OUTPUT_DIR`      | `<source>/sorted`  |
    /// | `SORT_MOVE_FILES`      | `false`            |
    /// | `SORT_BUCKET_MODE`     | `checkpoint`       |
    /// | `SORT_RETAIN_OUTPUT`   | `false`            |
    /// | `SORT_WRITE_REPORTS`   | `true`             |
    /// | `SORT_EXTRACT_WORKERS` | `4` (1..=64)       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SortConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source_dir = var("SORT_SOURCE_DIR")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("SORT_SOURCE_DIR"))?;
        let label = var("SORT_LABEL").ok_or(ConfigError::Missing("SORT_LABEL"))?;

        let mut config = Self::new(source_dir, label.trim());

        if let Some(output) = var("SORT_OUTPUT_DIR") {
            config.output_root = PathBuf::from(output);
        }
        if let Some(raw) = var("SORT_MOVE_FILES") {
            config.transfer_mode = if parse_bool("SORT_MOVE_FILES", &raw)? {
                TransferMode::Move
            } else {
                TransferMode::Copy
            };
        }
        if let Some(raw) = var("SORT_BUCKET_MODE") {
            config.bucket_mode = BucketMode::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "SORT_BUCKET_MODE",
                reason: format!("'{raw}' is not one of checkpoint, lora_stack"),
            })?;
        }
        if let Some(raw) = var("SORT_RETAIN_OUTPUT") {
            config.retain_existing = parse_bool("SORT_RETAIN_OUTPUT", &raw)?;
        }
        if let Some(raw) = var("SORT_WRITE_REPORTS") {
            config.write_reports = parse_bool("SORT_WRITE_REPORTS", &raw)?;
        }
        if let Some(raw) = var("SORT_EXTRACT_WORKERS") {
            let workers: usize = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SORT_EXTRACT_WORKERS",
                reason: format!("'{raw}' is not a positive integer"),
            })?;
            config.extract_workers = workers.clamp(1, MAX_EXTRACT_WORKERS);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the label and the source/output relationship.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_label(&self.label)?;
        if output_contains_source(&self.output_root, &self.source_dir) {
            return Err(ConfigError::OutputOverlapsSource {
                output: self.output_root.clone(),
                source_dir: self.source_dir.clone(),
            });
        }
        Ok(())
    }
}

/// Labels end up inside file names, so they must be short and free of
/// path separators.
pub fn validate_label(label: &str) -> Result<(), ConfigError> {
    if label.trim().is_empty() {
        return Err(ConfigError::InvalidLabel("label must not be empty".into()));
    }
    if label.chars().count() > MAX_LABEL_LENGTH {
        return Err(ConfigError::InvalidLabel(format!(
            "label must be at most {MAX_LABEL_LENGTH} characters"
        )));
    }
    if label.contains(['/', '\\']) {
        return Err(ConfigError::InvalidLabel(
            "label must not contain path separators".into(),
        ));
    }
    Ok(())
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

/// Whether clearing `output` would also remove `source`.
///
/// Both paths are resolved first, so `..`, `.`, relative paths and
/// symlinks cannot hide an ancestor of the source.
pub fn output_contains_source(output: &Path, source: &Path) -> bool {
    resolve_path(source).starts_with(resolve_path(output))
}

/// Canonical form of a path that may not exist yet: the longest existing
/// prefix is canonicalized and the remaining components are applied
/// lexically.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let components: Vec<Component<'_>> = absolute.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(canonical) = prefix.canonicalize() {
            return apply_components(canonical, &components[split..]);
        }
    }
    apply_components(PathBuf::new(), &components)
}

fn apply_components(mut base: PathBuf, components: &[Component<'_>]) -> PathBuf {
    for component in components {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other.as_os_str()),
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/data/batch"),
            ("SORT_LABEL", "Portraits"),
        ]))
        .unwrap();

        assert_eq!(config.output_root, PathBuf::from("/data/batch/sorted"));
        assert_eq!(config.transfer_mode, TransferMode::Copy);
        assert_eq!(config.bucket_mode, BucketMode::Checkpoint);
        assert!(!config.retain_existing);
        assert!(config.write_reports);
        assert_eq!(config.extract_workers, DEFAULT_EXTRACT_WORKERS);
    }

    #[test]
    fn overrides_are_read() {
        let config = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/data/batch"),
            ("SORT_LABEL", " Portraits "),
            ("SORT_OUTPUT_DIR", "/data/out"),
            ("SORT_MOVE_FILES", "yes"),
            ("SORT_BUCKET_MODE", "lora_stack"),
            ("SORT_RETAIN_OUTPUT", "1"),
            ("SORT_WRITE_REPORTS", "false"),
            ("SORT_EXTRACT_WORKERS", "500"),
        ]))
        .unwrap();

        assert_eq!(config.label, "Portraits");
        assert_eq!(config.output_root, PathBuf::from("/data/out"));
        assert_eq!(config.transfer_mode, TransferMode::Move);
        assert_eq!(config.bucket_mode, BucketMode::LoraStack);
        assert!(config.retain_existing);
        assert!(!config.write_reports);
        assert_eq!(config.extract_workers, MAX_EXTRACT_WORKERS);
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let config = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/a"),
            ("SORT_LABEL", "x"),
            ("SORT_EXTRACT_WORKERS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.extract_workers, 1);
    }

    #[test]
    fn missing_source_is_reported() {
        let err = SortConfig::from_lookup(lookup(&[("SORT_LABEL", "x")])).unwrap_err();
        assert_matches!(err, ConfigError::Missing("SORT_SOURCE_DIR"));
    }

    #[test]
    fn blank_label_counts_as_missing() {
        let err = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/a"),
            ("SORT_LABEL", "   "),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Missing("SORT_LABEL"));
    }

    #[test]
    fn bad_boolean_is_invalid() {
        let err = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/a"),
            ("SORT_LABEL", "x"),
            ("SORT_MOVE_FILES", "maybe"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "SORT_MOVE_FILES", .. });
    }

    #[test]
    fn unknown_bucket_mode_is_invalid() {
        let err = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/a"),
            ("SORT_LABEL", "x"),
            ("SORT_BUCKET_MODE", "vae"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "SORT_BUCKET_MODE", .. });
    }

    #[test]
    fn output_containing_source_is_rejected() {
        let err = SortConfig::from_lookup(lookup(&[
            ("SORT_SOURCE_DIR", "/data/batch"),
            ("SORT_LABEL", "x"),
            ("SORT_OUTPUT_DIR", "/data"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::OutputOverlapsSource { .. });
    }

    #[test]
    fn output_reaching_source_through_parent_dir_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("batch");
        std::fs::create_dir(&source).unwrap();

        let mut config = SortConfig::new(&source, "x");
        config.output_root = source.join("..");
        assert_matches!(config.validate(), Err(ConfigError::OutputOverlapsSource { .. }));

        config.output_root = source.join("sorted").join("..").join(".");
        assert_matches!(config.validate(), Err(ConfigError::OutputOverlapsSource { .. }));
    }

    #[test]
    fn output_that_does_not_exist_yet_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("batch");
        std::fs::create_dir(&source).unwrap();

        let mut config = SortConfig::new(&source, "x");
        assert!(config.validate().is_ok());

        config.output_root = tmp.path().join("out").join("nested");
        assert!(config.validate().is_ok());

        // Missing components are still normalized.
        config.output_root = tmp.path().join("missing").join("..").join("..");
        assert_matches!(config.validate(), Err(ConfigError::OutputOverlapsSource { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn output_symlinked_to_source_ancestor_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("batch");
        std::fs::create_dir(&source).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(tmp.path(), &link).unwrap();

        let mut config = SortConfig::new(&source, "x");
        config.output_root = link;
        assert_matches!(config.validate(), Err(ConfigError::OutputOverlapsSource { .. }));
    }

    #[test]
    fn label_rules() {
        assert!(validate_label("Batch 7").is_ok());
        assert_matches!(validate_label("a/b"), Err(ConfigError::InvalidLabel(_)));
        assert_matches!(validate_label("a\\b"), Err(ConfigError::InvalidLabel(_)));
        assert_matches!(
            validate_label(&"x".repeat(MAX_LABEL_LENGTH + 1)),
            Err(ConfigError::InvalidLabel(_))
        );
        assert!(validate_label(&"x".repeat(MAX_LABEL_LENGTH)).is_ok());
    }
}
