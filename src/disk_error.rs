// Disk emulation error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Invalid drive number {0}")]
    InvalidDrive(u8),

    #[error("No disk in drive")]
    NoDisk,

    #[error("Invalid disk size: {path:?} is {len} bytes (expected {expected})")]
    InvalidSize {
        path: PathBuf,
        len: u64,
        expected: u64,
    },

    #[error("Permission denied opening disk image {0:?}")]
    PermissionDenied(PathBuf),

    #[error("Controller did not leave the busy state in time")]
    Busy,

    #[error("Disk I/O error: {0}")]
    Io(#[from] std::io::Error),
}
