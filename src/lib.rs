//! Batch AreTomo2 tilt-series alignment across a bounded device pool,
//! plus export of the output tree into the layout Warp expects.

// Command line arguments and configuration.
pub mod config;
// Compute device slots and the pool they circulate through.
pub mod device;
// How tilt series are discovered and represented.
pub mod discover;
// Error handling.
pub mod error;
// Warp export of the alignment output tree.
pub mod export;
// One AreTomo2 invocation for one tilt series.
pub mod runner;
// The scheduling core.
pub mod scheduler;
// Run summary records.
pub mod summary;

pub use config::{AlignConfig, AretomoOpts, Config, ExportConfig, Mode};
pub use device::{Device, DevicePool};
pub use discover::{find_tilt_series, TiltSeries};
pub use error::BatchError;
pub use export::{run_export, CleanupRecord, CleanupSummary};
pub use scheduler::{run_align, Event, Scheduler};
pub use summary::{JobResult, Outcome, RunSummary};
