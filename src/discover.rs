//! Tilt-series discovery.
//!
//! One `TiltSeries` is one unit of work: an IMOD stack (`*.st`) paired
//! with its raw tilt angle file (`*.rawtlt`) in the same directory. A
//! stack without its companion is reported and excluded, never fatal.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use walkdir::WalkDir;

use crate::error::BatchError;

#[derive(Debug, Clone)]
pub struct TiltSeries {
    /// Base name of the stack, e.g. `Position_01`.
    pub name: String,
    /// Path to the `*.st` stack.
    pub stack: PathBuf,
    /// Path to the companion `*.rawtlt` file.
    pub tilt_file: PathBuf,
    /// Directory this series' outputs and logs go to.
    pub workdir: PathBuf,
}

impl TiltSeries {
    /// The aligned volume AreTomo2 is asked to write.
    pub fn volume(&self) -> PathBuf {
        self.workdir.join(format!("{}.mrc", self.name))
    }

    /// The IMOD metadata directory AreTomo2 creates next to the volume.
    /// Its presence marks a completed alignment; exit status alone does not.
    pub fn imod_dir(&self) -> PathBuf {
        self.workdir.join(format!("{}_Imod", self.name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.workdir.join("logs").join(format!("{}.log", self.name))
    }

    /// Whether a previous run already aligned this series.
    pub fn is_aligned(&self) -> bool {
        self.volume().is_file() && self.imod_dir().is_dir()
    }
}

/// Recursively finds all `*.st` stacks under `root` that have a companion
/// `*.rawtlt` next to them. Each series gets a working directory below
/// `out_root` mirroring its position in the input tree. Unpaired stacks
/// are returned separately so the caller can warn about them.
///
/// Fails only if `root` is not a directory or no eligible pair exists.
pub fn find_tilt_series(
    root: &Path,
    out_root: &Path,
) -> Result<(Vec<TiltSeries>, Vec<PathBuf>), BatchError> {
    if !root.is_dir() {
        return Err(BatchError::MissingRoot(root.to_path_buf()));
    }

    let mut series = vec![];
    let mut unpaired = vec![];
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().map_or(false, |ext| ext == "st") {
            continue;
        }
        let tilt_file = path.with_extension("rawtlt");
        if !tilt_file.is_file() {
            unpaired.push(path.to_path_buf());
            continue;
        }
        let name = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().into_owned(),
            None => continue,
        };
        let rel = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .unwrap_or_else(|| Path::new(""));
        series.push(TiltSeries {
            name,
            stack: path.to_path_buf(),
            tilt_file,
            workdir: out_root.join(rel),
        });
    }

    if series.is_empty() {
        return Err(BatchError::NoTiltSeries(root.to_path_buf()));
    }

    let series = series
        .into_iter()
        .sorted_by(|a, b| a.stack.cmp(&b.stack))
        .collect();
    let unpaired = unpaired.into_iter().sorted().collect();
    Ok((series, unpaired))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_pairs_discovered_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["b_series", "a_series"] {
            touch(&root.join(format!("{}.st", name)));
            touch(&root.join(format!("{}.rawtlt", name)));
        }

        let (series, unpaired) = find_tilt_series(root, Path::new("/out")).unwrap();
        assert!(unpaired.is_empty());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "a_series");
        assert_eq!(series[1].name, "b_series");
    }

    #[test]
    fn test_unpaired_stack_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("good.st"));
        touch(&root.join("good.rawtlt"));
        touch(&root.join("lonely.st"));

        let (series, unpaired) = find_tilt_series(root, Path::new("/out")).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "good");
        assert_eq!(unpaired.len(), 1);
        assert!(unpaired[0].ends_with("lonely.st"));
    }

    #[test]
    fn test_nested_layout_mirrored_below_out_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("grid1/square2")).unwrap();
        touch(&root.join("grid1/square2/Position_01.st"));
        touch(&root.join("grid1/square2/Position_01.rawtlt"));

        let (series, _) = find_tilt_series(root, Path::new("/out")).unwrap();
        assert_eq!(series[0].workdir, Path::new("/out/grid1/square2"));
        assert_eq!(series[0].volume(), Path::new("/out/grid1/square2/Position_01.mrc"));
        assert_eq!(
            series[0].log_path(),
            Path::new("/out/grid1/square2/logs/Position_01.log")
        );
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            find_tilt_series(&missing, Path::new("/out")),
            Err(BatchError::MissingRoot(_))
        ));
    }

    #[test]
    fn test_zero_pairs_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("unrelated.txt"));
        assert!(matches!(
            find_tilt_series(dir.path(), Path::new("/out")),
            Err(BatchError::NoTiltSeries(_))
        ));
    }
}
