//! Error types for the raw file tree.

use thiserror::Error;

use crate::types::FileId;

/// Errors from [`FileTree`](super::FileTree) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("File {file} is no longer valid")]
    InvalidFile { file: FileId },

    #[error("{file} is not a folder")]
    NotAFolder { file: FileId },

    #[error("{file} is a folder and has no content")]
    NotAData { file: FileId },

    #[error("'{name}' already exists in folder {folder}")]
    AlreadyExists { folder: FileId, name: String },

    #[error("Invalid file name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("File {file} is locked")]
    Locked { file: FileId },

    #[error("Lock for {file} is stale or belongs to another holder")]
    StaleLock { file: FileId },

    #[error("Cannot move {file} into its own subtree")]
    CyclicMove { file: FileId },

    #[error("The root folder cannot be {operation}")]
    RootOperation { operation: &'static str },

    #[error("No file at path '{path}'")]
    PathNotFound { path: String },
}

pub type FsResult<T> = Result<T, FsError>;
