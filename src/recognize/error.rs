//! Error types for recognizers and the recognizer chain.

use thiserror::Error;

use crate::fs::FsError;
use crate::types::RecognizerId;

/// A recognizer failed to build an object.
///
/// Reported to the `find` call that drove construction and never cached:
/// the next lookup starts from scratch.
#[derive(Error, Debug, Clone)]
pub enum RecognitionError {
    #[error("Recognizer '{recognizer}' failed: {reason}")]
    Failed {
        recognizer: RecognizerId,
        reason: String,
    },

    #[error("Recognizer '{recognizer}' panicked during construction")]
    Panicked { recognizer: RecognizerId },

    #[error("Invalid recognizer definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl RecognitionError {
    pub fn failed(recognizer: &RecognizerId, reason: impl Into<String>) -> Self {
        RecognitionError::Failed {
            recognizer: recognizer.clone(),
            reason: reason.into(),
        }
    }
}

/// Invalid edits of the recognizer chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Recognizer '{0}' is already installed")]
    Duplicate(RecognizerId),

    #[error("Recognizer '{0}' is not installed")]
    Unknown(RecognizerId),

    #[error("Built-in recognizer '{0}' cannot be changed")]
    BuiltIn(RecognizerId),

    #[error("New order must name every installed recognizer exactly once")]
    InvalidOrder,
}
