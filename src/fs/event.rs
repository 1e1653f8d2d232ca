//! Change notifications emitted by the file tree.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::types::FileId;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    /// Content rewritten.
    Changed,
    Deleted,
    Renamed { old_name: String },
    Moved { old_parent: FileId },
    AttributeChanged { name: String },
}

/// One change to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub file: FileId,
    /// Parent at the time of the event (the new parent for moves).
    pub parent: Option<FileId>,
    pub kind: FsEventKind,
}

/// All changes made by one atomic operation, delivered together.
///
/// Observers never see a batch split in two, so an operation touching
/// several member files of one object looks like a single transition.
#[derive(Debug, Clone)]
pub struct FsEventBatch {
    pub seq: u64,
    pub events: Arc<[FsEvent]>,
}

impl FsEventBatch {
    pub fn new(seq: u64, events: Vec<FsEvent>) -> Self {
        Self {
            seq,
            events: events.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Folders whose set of children may have changed.
    ///
    /// Attribute and content changes never alter membership; ordering
    /// attributes are picked up through [`FsEventBatch::attributes_changed`].
    pub fn membership_folders(&self) -> BTreeSet<FileId> {
        let mut folders = BTreeSet::new();
        for event in self.events.iter() {
            match &event.kind {
                FsEventKind::Created | FsEventKind::Deleted | FsEventKind::Renamed { .. } => {
                    folders.extend(event.parent);
                }
                FsEventKind::Moved { old_parent } => {
                    folders.insert(*old_parent);
                    folders.extend(event.parent);
                }
                FsEventKind::Changed | FsEventKind::AttributeChanged { .. } => {}
            }
        }
        folders
    }

    /// Every file mentioned by the batch.
    pub fn files(&self) -> BTreeSet<FileId> {
        self.events.iter().map(|e| e.file).collect()
    }

    /// Files deleted by the batch.
    pub fn deleted(&self) -> impl Iterator<Item = FileId> + '_ {
        self.events
            .iter()
            .filter(|e| e.kind == FsEventKind::Deleted)
            .map(|e| e.file)
    }

    /// Attribute names changed on `file`.
    pub fn attributes_changed(&self, file: FileId) -> impl Iterator<Item = &str> + '_ {
        self.events.iter().filter_map(move |e| match &e.kind {
            FsEventKind::AttributeChanged { name } if e.file == file => Some(name.as_str()),
            _ => None,
        })
    }
}
