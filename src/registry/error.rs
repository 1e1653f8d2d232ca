use thiserror::Error;

use crate::fs::FsError;
use crate::recognize::RecognitionError;
use crate::types::{FileId, ObjectId};

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("No recognizer claims file {file}")]
    Unrecognized { file: FileId },

    #[error("Object {object} is no longer valid")]
    Invalidated { object: ObjectId },

    #[error("Operation '{operation}' is not allowed on {type_name} object {object}")]
    OperationNotAllowed {
        operation: &'static str,
        object: ObjectId,
        type_name: String,
    },

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl RegistryError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Recognition(_) | RegistryError::Fs(FsError::Locked { .. })
        )
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
