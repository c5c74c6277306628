//! File-side machinery for rendezvous transfers.
//!
//! Everything here works on one file at a time: computing the OFT checksum
//! of a byte range, moving bytes between the file and a socket in small
//! chunks while observing pause and cancel requests, and exposing live
//! positions for progress display.

mod checksum;
mod file;
mod pause;
mod progress;
mod transferrer;
mod validation;

pub use checksum::{Checksummer, OftChecksum, checksum_bytes};
pub use file::TransferredFile;
pub use pause::PauseHelper;
pub use progress::{
    ProgressCallback, ProgressHandle, ProgressSnapshot, ProgressTicker, SpeedCalculator,
};
pub use transferrer::{ByteTransferrer, Direction};
pub use validation::validate_filename;

use std::time::Duration;

/// Largest amount moved per transfer iteration. Kept small so pause, cancel
/// and timeout requests are noticed between chunks.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound on a single readiness wait inside the transfer loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on a single wait for unpause before the loop re-checks.
pub const PAUSE_WAIT: Duration = Duration::from_secs(5);

/// Read buffer used while checksumming.
pub const CHECKSUM_BUFFER_SIZE: usize = 8 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed after {moved} bytes")]
    ChannelClosed { moved: u64 },

    #[error("file ended at {actual} bytes, expected {expected}")]
    UnexpectedEof { expected: u64, actual: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file too large for OFT: {size} bytes")]
    FileTooLarge { size: u64 },
}
