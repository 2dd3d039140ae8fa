//! Warp export of the alignment output tree.
//!
//! AreTomo2 leaves a mixture of `*_Imod/` metadata directories, raw
//! `.aln` and `.mrc` files, and per-series logs under the output root.
//! Export regroups them into the layout Warp expects:
//!
//! ```text
//! out/
//!   Position_01/
//!     Position_01.mrc
//!     Position_01.st.aln
//!     logs/
//!   imod/
//!     Position_01/
//!       Position_01.tlt
//!       Position_01.xf
//!       ...
//! ```
//!
//! Each series is transformed as a unit: a failure mid-series is
//! recorded as incomplete in the cleanup summary and later series still
//! proceed. Moves whose source already equals their destination are
//! skipped, so rerunning export over a finished tree is a no-op.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::BatchError;
use crate::summary::write_json;

pub const CLEANUP_FILE: &str = "cleanup_summary.json";

const IMOD_SUFFIX: &str = "_Imod";

/// One move or rename applied during export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOp {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Everything export did (or failed to do) for one tilt series.
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub name: String,
    pub deleted: Vec<PathBuf>,
    pub renamed: Vec<MoveOp>,
    pub final_dir: PathBuf,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub items: Vec<CleanupRecord>,
    /// Files from interrupted earlier runs, regrouped outside any
    /// per-series transform.
    pub stray_moves: Vec<MoveOp>,
    pub stray_deleted: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl CleanupSummary {
    /// True when the pass changed nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.items.is_empty() && self.stray_moves.is_empty() && self.stray_deleted.is_empty()
    }
}

/// Runs the export pass over an alignment output root. Per-series
/// failures are recorded, not raised; only an unusable root is fatal.
pub fn run_export(root: &Path) -> Result<CleanupSummary, BatchError> {
    if !root.is_dir() {
        return Err(BatchError::MissingRoot(root.to_path_buf()));
    }
    let root = root.canonicalize()?;
    let imod_root = root.join("imod");
    fs::create_dir_all(&imod_root)?;

    let mut summary = CleanupSummary {
        items: vec![],
        stray_moves: vec![],
        stray_deleted: vec![],
        timestamp: Utc::now(),
    };

    for imod_dir in find_imod_dirs(&root, &imod_root) {
        summary.items.push(export_series(&root, &imod_root, &imod_dir));
    }

    // Stragglers from runs that died between steps still converge here.
    sweep_strays(&root, &imod_root, &mut summary)?;

    summary.timestamp = Utc::now();
    write_json(&summary, &root.join(CLEANUP_FILE))?;
    Ok(summary)
}

/// All `*_Imod` directories under `root`, except anything already moved
/// below `imod/`. Collected up front because the transform renames the
/// very directories a live walk would be iterating.
fn find_imod_dirs(root: &Path, imod_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path() != imod_root)
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_dir()
                && e.file_name().to_string_lossy().ends_with(IMOD_SUFFIX)
        })
        .map(|e| e.into_path())
        .sorted()
        .collect()
}

/// The per-series transform: delete transient stacks, rename IMOD
/// metadata to the Warp convention under `imod/<name>/`, then gather the
/// series' own outputs into `<root>/<name>/`.
fn export_series(root: &Path, imod_root: &Path, imod_dir: &Path) -> CleanupRecord {
    let dirname = imod_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = dirname
        .strip_suffix(IMOD_SUFFIX)
        .unwrap_or(&dirname)
        .to_string();
    let mut record = CleanupRecord {
        name: name.clone(),
        deleted: vec![],
        renamed: vec![],
        final_dir: root.join(&name),
        complete: false,
        error: None,
    };

    match transform_series(root, imod_root, imod_dir, &name, &mut record) {
        Ok(()) => record.complete = true,
        Err(e) => record.error = Some(e.to_string()),
    }
    record
}

fn transform_series(
    root: &Path,
    imod_root: &Path,
    imod_dir: &Path,
    name: &str,
    record: &mut CleanupRecord,
) -> std::io::Result<()> {
    let tgt_dir = imod_root.join(name);
    fs::create_dir_all(&tgt_dir)?;

    // Steps one and two: drop the transient stack copies AreTomo2 leaves
    // in the IMOD directory, then rename and move the rest.
    let rename_map = warp_rename_map(name);
    let mut entries = fs::read_dir(imod_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();
    for src in entries {
        if is_transient_stack(&src) {
            fs::remove_file(&src)?;
            record.deleted.push(src);
            continue;
        }
        let file_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_name = rename_map
            .get(file_name.as_str())
            .cloned()
            .unwrap_or(file_name);
        let dst = tgt_dir.join(new_name);
        fs::rename(&src, &dst)?;
        record.renamed.push(MoveOp { src, dst });
    }
    fs::remove_dir(imod_dir)?;
    record.deleted.push(imod_dir.to_path_buf());

    // Step three: the series' own outputs move next to each other under
    // `<root>/<name>/`, wherever in the tree the run left them.
    let series_dir = root.join(name);
    fs::create_dir_all(&series_dir)?;
    let workdir = imod_dir.parent().unwrap_or(root);
    for candidate in [
        format!("{}.mrc", name),
        format!("{}.st.aln", name),
        format!("{}.aln", name),
    ] {
        let src = workdir.join(&candidate);
        let dst = series_dir.join(&candidate);
        if src != dst && src.is_file() {
            fs::rename(&src, &dst)?;
            record.renamed.push(MoveOp { src, dst });
        }
    }

    let log_src = workdir.join("logs").join(format!("{}.log", name));
    if log_src.is_file() {
        let dst = series_dir.join("logs").join(format!("{}.log", name));
        if log_src != dst {
            fs::create_dir_all(series_dir.join("logs"))?;
            fs::rename(&log_src, &dst)?;
            record.renamed.push(MoveOp { src: log_src, dst });
        }
    }
    Ok(())
}

/// The fixed rename table for IMOD metadata files. Anything not listed
/// keeps its name.
fn warp_rename_map(name: &str) -> HashMap<String, String> {
    HashMap::from([
        ("newst.com".to_string(), format!("{}_newst.com", name)),
        ("tilt.com".to_string(), format!("{}_tilt.com", name)),
        (
            format!("{}_st_order_list.csv", name),
            format!("{}_order_list.csv", name),
        ),
        (format!("{}_st.tlt", name), format!("{}.tlt", name)),
        (format!("{}_st.xf", name), format!("{}.xf", name)),
        (format!("{}_st.xtilt", name), format!("{}.xtilt", name)),
    ])
}

/// `*_st*.mrc` copies of the input stack; nothing downstream reads them.
fn is_transient_stack(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "mrc")
        && path
            .file_stem()
            .map_or(false, |stem| stem.to_string_lossy().contains("_st"))
}

/// Regroups leftover `.aln`, `.mrc` and log files whose series transform
/// already ran (or never will), keyed by file stem. Files already in
/// their final position are left untouched and unrecorded.
fn sweep_strays(
    root: &Path,
    imod_root: &Path,
    summary: &mut CleanupSummary,
) -> Result<(), BatchError> {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path() != imod_root)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .sorted()
        .collect();

    for path in files {
        let stem = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().into_owned(),
            None => continue,
        };
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        let dst = match ext.as_deref() {
            // `Position_01.st.aln` belongs to series `Position_01`.
            Some("aln") => {
                let name = stem.strip_suffix(".st").unwrap_or(&stem);
                root.join(name).join(path.file_name().expect("file has a name"))
            }
            Some("mrc") => root.join(&stem).join(path.file_name().expect("file has a name")),
            Some("log") if path.parent().map_or(false, |p| p.ends_with("logs")) => root
                .join(&stem)
                .join("logs")
                .join(path.file_name().expect("file has a name")),
            _ => continue,
        };
        if path == dst {
            continue;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&path, &dst)?;
        summary.stray_moves.push(MoveOp { src: path, dst });
    }

    // Source-side `logs/` directories drained above are dropped once
    // empty; everything else in the tree is left alone.
    let empty_log_dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path() != imod_root)
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_dir()
                && e.file_name() == "logs"
                && fs::read_dir(e.path()).map_or(false, |mut dir| dir.next().is_none())
        })
        .map(|e| e.into_path())
        .sorted()
        .collect();
    for dir in empty_log_dirs {
        fs::remove_dir(&dir)?;
        summary.stray_deleted.push(dir);
    }
    Ok(())
}
