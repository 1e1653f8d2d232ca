//! The recognizer contract.

use std::collections::BTreeSet;

use super::error::RecognitionError;
use crate::fs::FileTree;
use crate::object::ObjectSpec;
use crate::registry::IdentityRegistry;
use crate::types::{FileGroupKey, FileId, RecognizerId};

/// A primary file plus the secondary files that belong to the same object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryFileGroup {
    pub primary: FileId,
    pub secondaries: BTreeSet<FileId>,
}

impl PrimaryFileGroup {
    pub fn single(primary: FileId) -> Self {
        Self {
            primary,
            secondaries: BTreeSet::new(),
        }
    }

    pub fn with_secondaries(primary: FileId, secondaries: impl IntoIterator<Item = FileId>) -> Self {
        let mut secondaries: BTreeSet<FileId> = secondaries.into_iter().collect();
        secondaries.remove(&primary);
        Self { primary, secondaries }
    }

    pub fn key(&self) -> FileGroupKey {
        FileGroupKey::of(self.primary)
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.primary == file || self.secondaries.contains(&file)
    }

    /// Primary first, then secondaries in id order.
    pub fn files(&self) -> Vec<FileId> {
        let mut files = vec![self.primary];
        files.extend(self.secondaries.iter().copied());
        files
    }
}

/// Result of examining one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The file is the primary of this group.
    Primary(PrimaryFileGroup),
    /// The file belongs to the group of another (primary) file.
    Secondary { primary: FileId },
}

/// What a recognizer may consult while examining a file.
pub struct ExamineContext<'a> {
    pub fs: &'a FileTree,
    registry: Option<&'a IdentityRegistry>,
}

impl<'a> ExamineContext<'a> {
    pub fn new(fs: &'a FileTree) -> Self {
        Self { fs, registry: None }
    }

    pub(crate) fn with_registry(fs: &'a FileTree, registry: &'a IdentityRegistry) -> Self {
        Self {
            fs,
            registry: Some(registry),
        }
    }

    /// Key of the live object currently owning `file`. Never blocks.
    pub fn owner_of(&self, file: FileId) -> Option<FileGroupKey> {
        self.registry.and_then(|r| r.owner_of(file))
    }

    /// Recognizer pinned for `file`, if any.
    pub fn preferred(&self, file: FileId) -> Option<RecognizerId> {
        self.registry.and_then(|r| r.preferred_resolution(file))
    }
}

/// What a recognizer may use while building an object.
///
/// The registry lock is not held while `build` runs, so construction may
/// call back into the registry (for example to find a sibling's object).
pub struct BuildContext<'a> {
    pub fs: &'a FileTree,
    pub registry: &'a IdentityRegistry,
}

/// Decides which files it owns and builds objects for them.
///
/// `examine` must be a pure function of the file tree (and registry
/// queries): recognizers have to agree deterministically on which file of a
/// cluster is primary.
pub trait Recognizer: Send + Sync {
    fn id(&self) -> RecognizerId;

    /// Claim `file` as a primary or as a secondary of another file.
    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim>;

    /// Build the object for a group this recognizer claimed.
    fn build(
        &self,
        cx: &BuildContext<'_>,
        group: &PrimaryFileGroup,
    ) -> Result<ObjectSpec, RecognitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u32) -> FileId {
        FileId::new(v).unwrap()
    }

    #[test]
    fn test_group_never_lists_primary_as_secondary() {
        let group = PrimaryFileGroup::with_secondaries(id(2), [id(2), id(5), id(3)]);
        assert_eq!(group.files(), vec![id(2), id(3), id(5)]);
        assert!(group.contains(id(5)));
        assert_eq!(group.key(), FileGroupKey::of(id(2)));
    }
}
