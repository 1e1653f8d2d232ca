use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;

/// Identity of one node in a [`FileTree`](crate::fs::FileTree).
///
/// Ids are never reused: a deleted node keeps its id forever and every
/// lookup on it fails with `FsError::InvalidFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(NonZeroU32);

/// Identity of the set of files forming one object.
///
/// Always the id of the group's primary file, so two resolutions that agree
/// on the primary agree on the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileGroupKey(FileId);

/// Identity of one [`TypedObject`](crate::object::TypedObject) instance.
///
/// Monotonic per registry. A replacement object for the same key always
/// carries a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(NonZeroU64);

/// Name of a recognizer inside a [`RecognizerChain`](crate::recognize::RecognizerChain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecognizerId(Arc<str>);

impl FileId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub(crate) fn from_non_zero(value: NonZeroU32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }

    /// Convert to the underlying u32 value
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl FileGroupKey {
    /// Key of the group whose primary file is `primary`.
    pub fn of(primary: FileId) -> Self {
        Self(primary)
    }

    pub fn primary(&self) -> FileId {
        self.0
    }
}

impl ObjectId {
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub(crate) fn from_non_zero(value: NonZeroU64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0.get()
    }
}

impl RecognizerId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecognizerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for FileGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

impl fmt::Display for RecognizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_creation() {
        assert!(FileId::new(0).is_none());

        let id = FileId::new(100).unwrap();
        assert_eq!(id.value(), 100);
    }

    #[test]
    fn test_group_key_follows_primary() {
        let primary = FileId::new(7).unwrap();
        assert_eq!(FileGroupKey::of(primary), FileGroupKey::of(primary));
        assert_eq!(FileGroupKey::of(primary).primary(), primary);
    }

    #[test]
    fn test_recognizer_id_display() {
        let id = RecognizerId::from("text");
        assert_eq!(id.to_string(), "text");
        assert_eq!(id.as_str(), "text");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"text\"");
    }
}
