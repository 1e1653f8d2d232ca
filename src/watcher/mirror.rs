//! Mirror of an on-disk directory inside a [`FileTree`].
//!
//! The directory root maps to the tree root. Every change applied from disk
//! (an import, a created subtree, a removal) lands as one atomic batch, so
//! recognizers see multi-file groups appear and disappear in one step.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use parking_lot::Mutex;
use walkdir::WalkDir;

use super::error::WatchError;
use super::path_index::PathIndex;
use crate::config::WatchConfig;
use crate::fs::FileTree;
use crate::types::FileId;

enum Node {
    Folder,
    File(Vec<u8>),
}

pub struct DiskMirror {
    root: PathBuf,
    fs: Arc<FileTree>,
    index: Mutex<PathIndex>,
    ignore: Vec<Pattern>,
}

impl DiskMirror {
    /// Import `root` into `fs`, below the tree root.
    pub fn import(root: impl AsRef<Path>, fs: Arc<FileTree>, config: &WatchConfig) -> Result<Self, WatchError> {
        let requested = root.as_ref();
        let root = requested.canonicalize().map_err(|source| WatchError::Io {
            path: requested.to_path_buf(),
            source,
        })?;
        if !root.is_dir() {
            return Err(WatchError::PathWatchFailed {
                path: root,
                reason: "not a directory".to_string(),
            });
        }

        let mut ignore = Vec::new();
        for raw in &config.ignore_patterns {
            match Pattern::new(raw) {
                Ok(pattern) => ignore.push(pattern),
                Err(e) => crate::warn_event!("mirror", "ignoring bad pattern '{raw}': {e}"),
            }
            // `dir/**` also hides `dir` itself
            if let Some(dir) = raw.strip_suffix("/**")
                && let Ok(pattern) = Pattern::new(dir)
            {
                ignore.push(pattern);
            }
        }

        let mut index = PathIndex::new();
        index.insert(root.clone(), fs.root());
        let mirror = Self {
            root,
            fs,
            index: Mutex::new(index),
            ignore,
        };

        let nodes = mirror.scan(&mirror.root)?;
        let count = mirror.insert_nodes(nodes)?;
        crate::log_event!("mirror", "imported", "{count} entries from {}", mirror.root.display());
        Ok(mirror)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<FileTree> {
        &self.fs
    }

    /// Mirrored file for an on-disk path.
    pub fn file(&self, path: &Path) -> Option<FileId> {
        self.index.lock().file(path)
    }

    /// On-disk path of a mirrored file.
    pub fn path(&self, file: FileId) -> Option<PathBuf> {
        self.index.lock().path(file).map(Path::to_path_buf)
    }

    /// Number of mirrored entries, the root included.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.ignore.iter().any(|p| p.matches_path(relative))
    }

    /// Mirror a path that appeared on disk (file or whole directory).
    pub fn apply_created(&self, path: &Path) -> Result<usize, WatchError> {
        self.check_inside(path)?;
        if self.is_ignored(path) {
            return Ok(0);
        }
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.apply_removed(path),
            Err(source) => {
                return Err(WatchError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut nodes = Vec::new();
        if metadata.is_dir() {
            nodes.push((path.to_path_buf(), Node::Folder));
            nodes.extend(self.scan(path)?);
        } else {
            nodes.push((path.to_path_buf(), Node::File(read(path)?)));
        }
        let count = self.insert_nodes(nodes)?;
        crate::debug_event!("mirror", "created", "{} ({count} entries)", path.display());
        Ok(count)
    }

    /// Re-read the content of a changed file. Content is written under the
    /// file's lock.
    pub fn apply_modified(&self, path: &Path) -> Result<usize, WatchError> {
        self.check_inside(path)?;
        if self.is_ignored(path) {
            return Ok(0);
        }
        if !path.exists() {
            return self.apply_removed(path);
        }
        let Some(file) = self.file(path) else {
            return self.apply_created(path);
        };
        if path.is_dir() || self.fs.is_folder(file)? {
            return Ok(0);
        }

        let content = read(path)?;
        if self.fs.content(file)? == content {
            return Ok(0);
        }
        let lock = self.fs.lock(file)?;
        self.fs.write(&lock, &content)?;
        crate::debug_event!("mirror", "modified", "{}", path.display());
        Ok(1)
    }

    /// Drop a path, and everything mirrored below it, from the tree.
    pub fn apply_removed(&self, path: &Path) -> Result<usize, WatchError> {
        self.check_inside(path)?;
        if path == self.root {
            return Ok(0);
        }
        let removed = self.index.lock().remove_tree(path);
        if removed.is_empty() {
            return Ok(0);
        }
        self.fs.atomic(|batch| {
            for file in &removed {
                if batch.view().is_valid(*file) {
                    batch.delete(*file)?;
                }
            }
            Ok(())
        })?;
        crate::debug_event!("mirror", "removed", "{} ({} entries)", path.display(), removed.len());
        Ok(removed.len())
    }

    fn check_inside(&self, path: &Path) -> Result<(), WatchError> {
        if path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(WatchError::OutsideRoot {
                path: path.to_path_buf(),
            })
        }
    }

    /// Everything below `dir`, parents before children, in name order.
    fn scan(&self, dir: &Path) -> Result<Vec<(PathBuf, Node)>, WatchError> {
        let mut nodes = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_ignored(entry.path()));

        for entry in walker {
            let entry = entry?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                nodes.push((entry.into_path(), Node::Folder));
            } else if file_type.is_file() {
                let content = read(entry.path())?;
                nodes.push((entry.into_path(), Node::File(content)));
            }
        }
        Ok(nodes)
    }

    /// Apply `nodes` as one batch. Existing entries of the same kind are
    /// reused (files get the new content); a kind change replaces the entry.
    fn insert_nodes(&self, nodes: Vec<(PathBuf, Node)>) -> Result<usize, WatchError> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let mut known: HashMap<PathBuf, FileId> = {
            let index = self.index.lock();
            nodes
                .iter()
                .filter_map(|(path, _)| path.parent())
                .filter_map(|parent| index.file(parent).map(|file| (parent.to_path_buf(), file)))
                .collect()
        };

        let mirrored = self.fs.atomic(|batch| {
            let mut mirrored = Vec::with_capacity(nodes.len());
            for (path, node) in &nodes {
                let Some(parent) = path.parent().and_then(|p| known.get(p)).copied() else {
                    crate::debug_event!("mirror", "orphan", "{}", path.display());
                    continue;
                };
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };

                let existing = match batch.view().child_by_name(parent, &name)? {
                    Some(file) => Some((file, batch.view().is_folder(file)?)),
                    None => None,
                };
                let file = match (node, existing) {
                    (Node::Folder, Some((file, true))) => file,
                    (Node::File(content), Some((file, false))) => {
                        if batch.view().content(file)? != content.as_slice() {
                            batch.write(file, content)?;
                        }
                        file
                    }
                    (node, existing) => {
                        if let Some((stale, _)) = existing {
                            batch.delete(stale)?;
                        }
                        match node {
                            Node::Folder => batch.create_folder(parent, &name)?,
                            Node::File(content) => batch.create_file(parent, &name, content)?,
                        }
                    }
                };
                known.insert(path.clone(), file);
                mirrored.push((path.clone(), file));
            }
            Ok(mirrored)
        })?;

        let count = mirrored.len();
        let mut index = self.index.lock();
        for (path, file) in mirrored {
            index.insert(path, file);
        }
        Ok(count)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, WatchError> {
    std::fs::read(path).map_err(|source| WatchError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl std::fmt::Debug for DiskMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskMirror")
            .field("root", &self.root)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<FileTree>, DiskMirror) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}").unwrap();
        fs::write(dir.path().join("README.md"), "# hi").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let tree = Arc::new(FileTree::new());
        let mirror = DiskMirror::import(dir.path(), Arc::clone(&tree), &WatchConfig::default()).unwrap();
        (dir, tree, mirror)
    }

    #[test]
    fn test_import_mirrors_structure_and_content() {
        let (_dir, tree, mirror) = setup();

        let lib = tree.resolve_path("src/lib.rs").unwrap();
        assert_eq!(tree.content(lib).unwrap(), b"pub fn x() {}");
        assert!(tree.resolve_path("README.md").is_ok());
        assert_eq!(mirror.path(lib).unwrap(), mirror.root().join("src/lib.rs"));
        // root, src, src/lib.rs, README.md
        assert_eq!(mirror.len(), 4);
    }

    #[test]
    fn test_ignored_directories_are_skipped() {
        let (_dir, tree, mirror) = setup();

        assert!(tree.resolve_path(".git").is_err());
        assert!(mirror.is_ignored(&mirror.root().join(".git")));
        assert!(mirror.is_ignored(&mirror.root().join(".git/HEAD")));
        assert!(!mirror.is_ignored(&mirror.root().join("src")));
    }

    #[test]
    fn test_created_directory_lands_in_one_batch() {
        let (dir, tree, mirror) = setup();
        let rx = tree.events().subscribe();
        fs::create_dir_all(dir.path().join("ui")).unwrap();
        fs::write(dir.path().join("ui/Main.form"), "").unwrap();
        fs::write(dir.path().join("ui/Main.java"), "").unwrap();

        let count = mirror.apply_created(&mirror.root().join("ui")).unwrap();

        assert_eq!(count, 3);
        assert_eq!(rx.try_iter().count(), 1);
        assert!(tree.resolve_path("ui/Main.java").is_ok());
    }

    #[test]
    fn test_modified_content_is_written() {
        let (dir, tree, mirror) = setup();
        fs::write(dir.path().join("README.md"), "# changed").unwrap();

        mirror.apply_modified(&mirror.root().join("README.md")).unwrap();

        let readme = tree.resolve_path("README.md").unwrap();
        assert_eq!(tree.content(readme).unwrap(), b"# changed");
        assert!(!tree.is_locked(readme));
    }

    #[test]
    fn test_removed_directory_drops_subtree() {
        let (dir, tree, mirror) = setup();
        let lib = tree.resolve_path("src/lib.rs").unwrap();
        fs::remove_dir_all(dir.path().join("src")).unwrap();

        let removed = mirror.apply_removed(&mirror.root().join("src")).unwrap();

        assert_eq!(removed, 2);
        assert!(!tree.is_valid(lib));
        assert!(mirror.file(&mirror.root().join("src/lib.rs")).is_none());
    }

    #[test]
    fn test_paths_outside_root_are_rejected() {
        let (_dir, _tree, mirror) = setup();
        assert!(matches!(
            mirror.apply_created(Path::new("/definitely/elsewhere")),
            Err(WatchError::OutsideRoot { .. })
        ));
    }
}
