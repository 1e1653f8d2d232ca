//! Error types for the disk mirror.

use std::path::PathBuf;
use thiserror::Error;

use crate::fs::FsError;

/// Errors from mirroring or watching a directory.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path {path} is outside the mirrored root")]
    OutsideRoot { path: PathBuf },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error(transparent)]
    Tree(#[from] FsError),

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

impl From<walkdir::Error> for WatchError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(PathBuf::from).unwrap_or_default();
        match e.into_io_error() {
            Some(source) => WatchError::Io { path, source },
            None => WatchError::EventError {
                details: format!("filesystem loop at {}", path.display()),
            },
        }
    }
}
