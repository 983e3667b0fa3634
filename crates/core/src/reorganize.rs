//! On-disk reorganization of a classified batch.
//!
//! Each image is transferred into its destination folder under a unique
//! name, followed by its sidecars under the same new stem. Non-image files
//! still in the source directory are swept into [`MISC_FOLDER`] once all
//! images are done. Calls here mutate shared filesystem state and must run
//! sequentially.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::ExtractedParameters;
use crate::error::{CoreError, RelocateError};
use crate::inventory::{kind_of, list_regular_files, FileKind};
use crate::naming::{resolve_unique_name, split_filename, MISC_FOLDER};
use crate::signature::GroupSignature;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether source files are moved or left in place and copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Move,
    Copy,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sidecar that could not be relocated with its image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of relocating one image and its sidecars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocatedImage {
    /// Final path of the image (after collision resolution).
    pub destination: PathBuf,
    /// `(source, destination)` for every sidecar transferred.
    pub sidecars: Vec<(PathBuf, PathBuf)>,
    pub sidecar_failures: Vec<SidecarFailure>,
    /// Whether the destination folder was created by this call.
    pub created_folder: bool,
}

impl RelocatedImage {
    /// Final file name of the image.
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Per-image record of a completed relocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub original_path: PathBuf,
    pub original_filename: String,
    pub new_filename: String,
    pub generation: u32,
    pub signature: GroupSignature,
    /// Destination folder name under the output root.
    pub folder: String,
    /// Destination paths of the relocated sidecars.
    pub sidecars: Vec<PathBuf>,
    pub parameters: ExtractedParameters,
}

/// Non-target files of the source directory grouped by stem, built once per
/// batch from the inventory.
///
/// A sidecar is a file that shares its image's stem but not its extension.
/// Other target images with the same stem are never sidecars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarIndex {
    by_stem: HashMap<String, Vec<PathBuf>>,
}

impl SidecarIndex {
    /// Index `others`, keeping their order within each stem.
    pub fn build(others: &[PathBuf]) -> Self {
        let mut by_stem: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in others.iter().filter(|p| kind_of(p) == FileKind::Other) {
            let name = file_name_of(path);
            let (stem, _) = split_filename(&name);
            by_stem.entry(stem.to_string()).or_default().push(path.clone());
        }
        Self { by_stem }
    }

    /// Sidecars of `image`, sorted by name.
    pub fn sidecars_of(&self, image: &Path) -> &[PathBuf] {
        let name = file_name_of(image);
        self.by_stem
            .get(split_filename(&name).0)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every indexed file belonging to one of `images`. The sweep leaves
    /// these with their image.
    pub fn claimed_by<'a, I>(&self, images: I) -> HashSet<PathBuf>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        images
            .into_iter()
            .flat_map(|image| self.sidecars_of(image).iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_stem.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stem.is_empty()
    }
}

/// Outcome of the end-of-run miscellaneous sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub relocated: Vec<(PathBuf, PathBuf)>,
    /// `(path, reason)` for every file left behind.
    pub failures: Vec<(PathBuf, String)>,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Relocate `image` into `dest_dir` as `new_filename` (or a collision-free
/// variant), then its `sidecars` under the new stem.
///
/// A sidecar failure is logged and recorded without undoing the image
/// transfer; the remaining sidecars are still attempted. Any failure before
/// the image is transferred leaves the source untouched.
pub fn relocate_image(
    image: &Path,
    sidecars: &[PathBuf],
    dest_dir: &Path,
    new_filename: &str,
    mode: TransferMode,
) -> Result<RelocatedImage, RelocateError> {
    let created_folder = !dest_dir.is_dir();
    fs::create_dir_all(dest_dir).map_err(|source| RelocateError::CreateFolder {
        path: dest_dir.to_path_buf(),
        source,
    })?;

    let suffixes: Vec<String> = sidecars
        .iter()
        .map(|p| split_filename(&file_name_of(p)).1.to_string())
        .collect();

    let final_name = resolve_unique_name(dest_dir, new_filename, &suffixes)?;
    let destination = dest_dir.join(&final_name);

    transfer_file(image, &destination, mode).map_err(|source| RelocateError::Transfer {
        from: image.to_path_buf(),
        to: destination.clone(),
        source,
    })?;

    let (new_stem, _) = split_filename(&final_name);
    let mut relocated = Vec::with_capacity(sidecars.len());
    let mut sidecar_failures = Vec::new();

    for (sidecar, suffix) in sidecars.iter().zip(&suffixes) {
        let target = dest_dir.join(format!("{new_stem}{suffix}"));
        match transfer_file(sidecar, &target, mode) {
            Ok(()) => relocated.push((sidecar.clone(), target)),
            Err(e) => {
                tracing::warn!(
                    sidecar = %sidecar.display(),
                    target = %target.display(),
                    error = %e,
                    "Sidecar relocation failed"
                );
                sidecar_failures.push(SidecarFailure {
                    path: sidecar.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::debug!(
        from = %image.display(),
        to = %destination.display(),
        %mode,
        sidecars = relocated.len(),
        "Image relocated"
    );

    Ok(RelocatedImage {
        destination,
        sidecars: relocated,
        sidecar_failures,
        created_folder,
    })
}

/// Transfer every remaining visible non-target file of `source_dir` into
/// `<output_root>/Other Files/`. Paths in `skip` are left alone.
///
/// Must run after all images and reports are done.
pub fn sweep_miscellaneous(
    source_dir: &Path,
    output_root: &Path,
    mode: TransferMode,
    skip: &HashSet<PathBuf>,
) -> Result<SweepOutcome, CoreError> {
    let candidates: Vec<PathBuf> = list_regular_files(source_dir)?
        .into_iter()
        .filter(|p| kind_of(p) == FileKind::Other && !skip.contains(p))
        .collect();

    let mut outcome = SweepOutcome::default();
    if candidates.is_empty() {
        return Ok(outcome);
    }

    let misc_dir = output_root.join(MISC_FOLDER);
    fs::create_dir_all(&misc_dir).map_err(|e| CoreError::io(&misc_dir, e))?;

    for path in candidates {
        match sweep_one(&path, &misc_dir, mode) {
            Ok(target) => outcome.relocated.push((path, target)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Miscellaneous file not relocated"
                );
                outcome.failures.push((path, e.to_string()));
            }
        }
    }

    tracing::info!(
        relocated = outcome.relocated.len(),
        failed = outcome.failures.len(),
        "Miscellaneous sweep complete"
    );
    Ok(outcome)
}

/// Move or copy one file. Moves fall back to copy then remove when a
/// rename is not possible (e.g. across filesystems).
pub fn transfer_file(from: &Path, to: &Path, mode: TransferMode) -> io::Result<()> {
    match mode {
        TransferMode::Copy => fs::copy(from, to).map(|_| ()),
        TransferMode::Move => match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                if !from.exists() {
                    return Err(rename_err);
                }
                tracing::debug!(
                    from = %from.display(),
                    error = %rename_err,
                    "Rename failed, copying instead"
                );
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn sweep_one(path: &Path, misc_dir: &Path, mode: TransferMode) -> Result<PathBuf, RelocateError> {
    let final_name = resolve_unique_name(misc_dir, &file_name_of(path), &[])?;
    let target = misc_dir.join(final_name);
    transfer_file(path, &target, mode).map_err(|source| RelocateError::Transfer {
        from: path.to_path_buf(),
        to: target.clone(),
        source,
    })?;
    Ok(target)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn touch(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn sidecars(src: &Path) -> SidecarIndex {
        SidecarIndex::build(&crate::inventory::scan_source(src).unwrap().others)
    }

    // -- SidecarIndex ---------------------------------------------------------

    #[test]
    fn sidecars_share_stem_only() {
        let dir = tempfile::tempdir().unwrap();
        let image = touch(dir.path(), "img.png", "png");
        touch(dir.path(), "img.txt", "report");
        touch(dir.path(), "img.json", "{}");
        touch(dir.path(), "img2.txt", "other");
        touch(dir.path(), "img.PNG", "second image");

        let index = sidecars(dir.path());
        let names: Vec<_> = index
            .sidecars_of(&image)
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["img.json", "img.txt"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn claimed_files_cover_only_listed_images() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.png", "png");
        touch(dir.path(), "a.txt", "sidecar");
        touch(dir.path(), "b.txt", "orphan");

        let claimed = sidecars(dir.path()).claimed_by([&a]);
        assert_eq!(claimed.len(), 1);
        assert!(claimed.contains(&dir.path().join("a.txt")));
    }

    #[test]
    fn image_without_sidecars_gets_empty_slice() {
        let index = SidecarIndex::default();
        assert!(index.is_empty());
        assert!(index.sidecars_of(Path::new("/src/a.png")).is_empty());
    }

    // -- relocate_image -------------------------------------------------------

    #[test]
    fn move_takes_sidecar_under_new_stem() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let image = touch(src.path(), "orig.png", "png");
        let sidecar = touch(src.path(), "orig.txt", "report");
        let dest = out.path().join("X");

        let result = relocate_image(
            &image,
            &[sidecar.clone()],
            &dest,
            "[B] Gen 01 $0001.png",
            TransferMode::Move,
        )
        .unwrap();

        assert!(result.created_folder);
        assert_eq!(result.destination, dest.join("[B] Gen 01 $0001.png"));
        assert!(dest.join("[B] Gen 01 $0001.png").is_file());
        assert_eq!(fs::read_to_string(dest.join("[B] Gen 01 $0001.txt")).unwrap(), "report");
        assert!(!image.exists());
        assert!(!sidecar.exists());
        assert!(result.sidecar_failures.is_empty());
    }

    #[test]
    fn copy_leaves_sources_in_place() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let image = touch(src.path(), "orig.png", "png");
        let sidecar = touch(src.path(), "orig.txt", "report");

        let result = relocate_image(
            &image,
            &[sidecar.clone()],
            out.path(),
            "new.png",
            TransferMode::Copy,
        )
        .unwrap();

        assert!(!result.created_folder);
        assert!(image.exists() && sidecar.exists());
        assert!(out.path().join("new.png").exists());
        assert!(out.path().join("new.txt").exists());
    }

    #[test]
    fn failed_sidecar_is_recorded_and_others_still_move() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let image = touch(src.path(), "a.png", "png");
        let good = touch(src.path(), "a.json", "{}");
        // Removed after indexing, so its transfer fails.
        let vanished = src.path().join("a.txt");

        let result = relocate_image(
            &image,
            &[good.clone(), vanished.clone()],
            out.path(),
            "new.png",
            TransferMode::Move,
        )
        .unwrap();

        assert!(out.path().join("new.png").is_file());
        assert!(!image.exists());
        assert_eq!(result.sidecars, vec![(good, out.path().join("new.json"))]);
        assert_eq!(result.sidecar_failures.len(), 1);
        assert_eq!(result.sidecar_failures[0].path, vanished);
    }

    #[test]
    fn colliding_names_produce_two_files() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = touch(src.path(), "a.png", "first");
        let b = touch(src.path(), "b.png", "second");

        let first = relocate_image(&a, &[], out.path(), "same.png", TransferMode::Move).unwrap();
        let second = relocate_image(&b, &[], out.path(), "same.png", TransferMode::Move).unwrap();

        assert_eq!(first.file_name(), "same.png");
        assert_eq!(second.file_name(), "same_1.png");
        assert_eq!(fs::read_to_string(out.path().join("same.png")).unwrap(), "first");
        assert_eq!(fs::read_to_string(out.path().join("same_1.png")).unwrap(), "second");
    }

    #[test]
    fn leftover_sidecar_at_destination_forces_new_name() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let image = touch(src.path(), "a.png", "png");
        let sidecar = touch(src.path(), "a.txt", "fresh");
        touch(out.path(), "new.txt", "stale from previous run");

        let result =
            relocate_image(&image, &[sidecar], out.path(), "new.png", TransferMode::Move).unwrap();

        assert_eq!(result.file_name(), "new_1.png");
        assert_eq!(fs::read_to_string(out.path().join("new_1.txt")).unwrap(), "fresh");
        assert_eq!(
            fs::read_to_string(out.path().join("new.txt")).unwrap(),
            "stale from previous run"
        );
    }

    #[test]
    fn missing_image_is_transfer_error() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let result = relocate_image(
            &src.path().join("gone.png"),
            &[],
            out.path(),
            "new.png",
            TransferMode::Move,
        );
        assert_matches!(result, Err(RelocateError::Transfer { .. }));
    }

    // -- sweep_miscellaneous --------------------------------------------------

    #[test]
    fn sweep_moves_non_images_only() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        touch(src.path(), "left.png", "png");
        touch(src.path(), "notes.md", "notes");
        touch(src.path(), "clip.mp4", "video");

        let outcome = sweep_miscellaneous(
            src.path(),
            out.path(),
            TransferMode::Move,
            &HashSet::new(),
        )
        .unwrap();

        assert_eq!(outcome.relocated.len(), 2);
        assert!(src.path().join("left.png").exists());
        assert!(out.path().join(MISC_FOLDER).join("notes.md").exists());
        assert!(out.path().join(MISC_FOLDER).join("clip.mp4").exists());
    }

    #[test]
    fn sweep_respects_skip_set_and_collisions() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let skipped = touch(src.path(), "a.txt", "sidecar already copied");
        touch(src.path(), "b.txt", "misc");
        fs::create_dir_all(out.path().join(MISC_FOLDER)).unwrap();
        touch(&out.path().join(MISC_FOLDER), "b.txt", "previous run");

        let skip: HashSet<PathBuf> = [skipped.clone()].into_iter().collect();
        let outcome =
            sweep_miscellaneous(src.path(), out.path(), TransferMode::Copy, &skip).unwrap();

        assert_eq!(outcome.relocated.len(), 1);
        assert!(out.path().join(MISC_FOLDER).join("b_1.txt").exists());
        assert!(!out.path().join(MISC_FOLDER).join("a.txt").exists());
        assert!(skipped.exists());
    }

    #[test]
    fn sweep_with_nothing_to_do_creates_no_folder() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        touch(src.path(), "only.png", "png");

        let outcome = sweep_miscellaneous(
            src.path(),
            out.path(),
            TransferMode::Move,
            &HashSet::new(),
        )
        .unwrap();

        assert!(outcome.relocated.is_empty());
        assert!(!out.path().join(MISC_FOLDER).exists());
    }

    // -- transfer_file --------------------------------------------------------

    #[test]
    fn move_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = touch(dir.path(), "x.txt", "data");
        let to = dir.path().join("y.txt");
        transfer_file(&from, &to, TransferMode::Move).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "data");
    }
}
