use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Input root does not exist or is not a directory: {0}")]
    MissingRoot(PathBuf),
    #[error("No *.st + *.rawtlt pairs found under {0}")]
    NoTiltSeries(PathBuf),
    #[error("AreTomo executable not found on PATH: {0}")]
    AretomoNotFound(String),
    #[error("Bad GPU list: {0}")]
    BadGpuList(String),
    #[error("Device pool closed while series were still waiting")]
    DevicePoolClosed,
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
