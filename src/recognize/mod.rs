//! Recognition: deciding which recognizer owns a file and which files form
//! one object.
//!
//! ```text
//! file --> RecognizerChain snapshot (version N)
//!            folder | shadow | installed... | default
//!              examine(file) -> Primary(group) | Secondary{primary}
//!                                  |                   |
//!                                  |     resolve(primary), check membership
//!                                  v
//!                           Resolution { recognizer, group, version }
//! ```

mod builtin;
mod chain;
mod error;
mod recognizer;

pub use builtin::{
    DefaultRecognizer, FolderRecognizer, PatternRecognizer, SHADOW_EXTENSION, ShadowRecognizer,
};
pub use chain::{ChainEvent, ChainSnapshot, RecognizerChain, Resolution};
pub use error::{ChainError, RecognitionError};
pub use recognizer::{BuildContext, Claim, ExamineContext, PrimaryFileGroup, Recognizer};
