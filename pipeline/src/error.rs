//! Error types for the pipeline.

use std::path::{Path, PathBuf};

use autoproc_codec::CodecError;
use autoproc_directory_watcher::WatcherError;
use thiserror::Error;

use crate::command::CommandError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Neither the extension nor the contents identify a known format.
    #[error("unknown format: {}", .0.display())]
    UnknownFormat(PathBuf),

    /// Parse or render failure, including unsupported target formats.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Filesystem error on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unknown command.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Another attempt on the same path is still running.
    #[error("already processing: {}", .0.display())]
    AlreadyInFlight(PathBuf),

    /// The original was converted but could not be moved to the archive.
    #[error("archiving {} failed: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory watcher error.
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
