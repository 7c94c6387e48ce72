//! Error types for the scanning and thumbnail subsystems.
//!
//! Only [`ScanError`] and [`GeneratorError`] ever reach a caller synchronously.
//! Everything else is recovered inside the background flows and surfaced as an
//! event carrying the offending path.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A scan command was rejected before any work started.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root is empty or does not exist: {0:?}")]
    InvalidRoot(PathBuf),

    #[error("a scan is already running")]
    AlreadyRunning,

    #[error("failed to spawn scanner thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Metadata for a single file could not be read.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read file metadata for {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Content hashing failed; callers treat this as "no hash".
#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to hash file: {0}")]
    Io(#[from] io::Error),
}

/// A source file could not be turned into a raster.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("unsupported media format: {0:?}")]
    Unsupported(PathBuf),
}

/// Persistent thumbnail storage failed.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("thumbnail cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("thumbnail cache image error: {0}")]
    Image(#[from] image::ImageError),
}

/// The thumbnail generator was misconfigured or asked for something it cannot produce.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("thumbnail size {0} is outside the supported range")]
    InvalidSize(u32),

    #[error("thumbnail generator has been shut down")]
    Stopped,

    #[error("failed to spawn thumbnail worker: {0}")]
    Spawn(#[source] io::Error),
}
