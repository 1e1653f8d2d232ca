//! Two-way mapping between on-disk paths and mirrored file ids.
//!
//! Paths are interned once and shared by both directions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::FileId;

#[derive(Debug, Default)]
pub struct PathIndex {
    by_path: HashMap<Arc<Path>, FileId>,
    by_file: HashMap<FileId, Arc<Path>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, file: FileId) {
        let path: Arc<Path> = Arc::from(path.into());
        if let Some(previous) = self.by_file.insert(file, Arc::clone(&path)) {
            self.by_path.remove(&previous);
        }
        if let Some(previous) = self.by_path.insert(path, file)
            && previous != file
        {
            self.by_file.remove(&previous);
        }
    }

    pub fn file(&self, path: &Path) -> Option<FileId> {
        self.by_path.get(path).copied()
    }

    pub fn path(&self, file: FileId) -> Option<&Path> {
        self.by_file.get(&file).map(AsRef::as_ref)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Remove `path` and everything below it. Returns the removed ids,
    /// `path`'s own id first when it was indexed.
    pub fn remove_tree(&mut self, path: &Path) -> Vec<FileId> {
        let mut doomed: Vec<(Arc<Path>, FileId)> = self
            .by_path
            .iter()
            .filter(|(p, _)| p.starts_with(path))
            .map(|(p, f)| (Arc::clone(p), *f))
            .collect();
        doomed.sort_by_key(|(p, _)| p.components().count());

        for (p, f) in &doomed {
            self.by_path.remove(p);
            self.by_file.remove(f);
        }
        doomed.into_iter().map(|(_, f)| f).collect()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Every indexed path, shortest first.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.by_path.keys().map(|p| p.to_path_buf()).collect();
        paths.sort_by_key(|p| p.components().count());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u32) -> FileId {
        FileId::new(v).unwrap()
    }

    #[test]
    fn test_lookup_both_ways() {
        let mut index = PathIndex::new();
        index.insert("/m/a.txt", id(2));

        assert_eq!(index.file(Path::new("/m/a.txt")), Some(id(2)));
        assert_eq!(index.path(id(2)), Some(Path::new("/m/a.txt")));
        assert!(index.contains(Path::new("/m/a.txt")));
    }

    #[test]
    fn test_reinsert_moves_the_mapping() {
        let mut index = PathIndex::new();
        index.insert("/m/a.txt", id(2));
        index.insert("/m/b.txt", id(2));

        assert_eq!(index.file(Path::new("/m/a.txt")), None);
        assert_eq!(index.file(Path::new("/m/b.txt")), Some(id(2)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_tree_takes_descendants_only() {
        let mut index = PathIndex::new();
        index.insert("/m/src", id(2));
        index.insert("/m/src/lib.rs", id(3));
        index.insert("/m/src/deep/mod.rs", id(4));
        index.insert("/m/srcx.txt", id(5));

        let removed = index.remove_tree(Path::new("/m/src"));

        assert_eq!(removed[0], id(2));
        assert_eq!(removed.len(), 3);
        assert_eq!(index.file(Path::new("/m/srcx.txt")), Some(id(5)));
        assert!(!index.is_empty());
    }
}
