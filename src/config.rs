//! Configuration for aretomo-batch.
//!
//! Currently holds clap structs for command line arguments and flags,
//! plus the enumerated set of AreTomo2 options we pass through. Options
//! AreTomo2 accepts but this tool never varies (`-Align`, `-TiltCor`,
//! `-OutImod`) are pinned in the runner instead.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(version, author)]
pub struct Config {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand)]
pub enum Mode {
    /// Align every tilt series under a root directory with AreTomo2
    Align(AlignConfig),
    /// Reorganize alignment outputs into the Warp-friendly layout
    Export(ExportConfig),
}

#[derive(Args, Clone)]
pub struct AlignConfig {
    /// Root directory, searched recursively for *.st + *.rawtlt pairs
    pub imod_dir: PathBuf,

    /// Root directory for alignment outputs
    pub out_dir: PathBuf,

    /// Number of concurrent AreTomo2 invocations
    #[arg(long, short, default_value = "2")]
    pub jobs: usize,

    /// Comma-separated GPU ids. An empty list serializes all work
    /// through a single CPU slot.
    #[arg(long, short, default_value = "0,1")]
    pub gpus: String,

    /// AreTomo2 executable to invoke
    #[arg(long, default_value = "AreTomo2")]
    pub aretomo: String,

    /// Don't re-run series whose output artifacts already exist
    #[arg(long)]
    pub skip_existing: bool,

    /// Record would-be invocations without touching the filesystem
    #[arg(long)]
    pub dry_run: bool,

    /// Stream the first series' AreTomo2 output to the terminal
    #[arg(long)]
    pub show_output: bool,

    /// Kill an AreTomo2 invocation after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub aretomo_opts: AretomoOpts,
}

/// AreTomo2 flags exposed on the command line, each with the default the
/// original pipeline used.
#[derive(Args, Clone, Debug)]
pub struct AretomoOpts {
    /// -AlignZ value passed to AreTomo2
    #[arg(long, default_value = "1200")]
    pub align_z: u32,

    /// -VolZ value; 0 skips reconstruction
    #[arg(long, default_value = "0")]
    pub vol_z: u32,

    /// -TiltAxis angle, optionally followed by the refine flag
    #[arg(long, num_args = 1..=2, value_names = ["ANGLE", "REFINE"], allow_negative_numbers = true)]
    pub tilt_axis: Option<Vec<f64>>,

    /// -DarkTol threshold for dropping dark tilt images
    #[arg(long, default_value = "0.7")]
    pub dark_tol: f64,
}

#[derive(Args)]
pub struct ExportConfig {
    /// Root directory of alignment outputs to reorganize
    pub out_dir: PathBuf,
}

/// Parses the `-g` GPU list. An empty string yields an empty list, which
/// the device pool turns into the explicit CPU slot. Unparsable or
/// duplicate ids are rejected.
pub fn parse_gpus(gpus: &str) -> Result<Vec<u32>, String> {
    let trimmed = gpus.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }
    let mut seen = HashSet::new();
    let mut ids = vec![];
    for part in trimmed.split(',') {
        let id: u32 = part
            .trim()
            .parse()
            .map_err(|_| format!("unparsable GPU id '{}' in '{}'", part, gpus))?;
        if !seen.insert(id) {
            return Err(format!("duplicate GPU id {} in '{}'", id, gpus));
        }
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpus_default() {
        assert_eq!(parse_gpus("0,1").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_parse_gpus_single_and_spaces() {
        assert_eq!(parse_gpus("3").unwrap(), vec![3]);
        assert_eq!(parse_gpus(" 0, 2 ").unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_parse_gpus_empty_degrades() {
        assert_eq!(parse_gpus("").unwrap(), Vec::<u32>::new());
        assert_eq!(parse_gpus("  ").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_parse_gpus_rejects_garbage() {
        assert!(parse_gpus("0,x").is_err());
        assert!(parse_gpus("-1").is_err());
    }

    #[test]
    fn test_parse_gpus_rejects_duplicates() {
        assert!(parse_gpus("0,1,0").is_err());
    }
}
