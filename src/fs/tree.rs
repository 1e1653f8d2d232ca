//! In-memory hierarchical file tree with atomic batches.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use super::error::{FsError, FsResult};
use super::event::{FsEvent, FsEventBatch, FsEventKind};
use crate::events::EventHub;
use crate::types::FileId;

/// Attribute value stored on a file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

/// Split a file name into base name and extension.
///
/// The extension is whatever follows the last dot, unless the dot is the
/// first character (`.hidden` has no extension).
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn validate_name(name: &str) -> FsResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') || name.contains('\\') {
        "name contains a path separator"
    } else if name == "." || name == ".." {
        "name is reserved"
    } else {
        return Ok(());
    };
    Err(FsError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[derive(Debug, Clone)]
enum NodeKind {
    Folder { children: Vec<FileId> },
    Data { content: Vec<u8> },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<FileId>,
    kind: NodeKind,
    attributes: BTreeMap<String, AttrValue>,
}

/// Node storage behind the tree lock.
#[derive(Debug)]
pub struct TreeState {
    nodes: HashMap<FileId, Node>,
    next_id: NonZeroU32,
    root: FileId,
    /// Prior value of every node touched by the running batch; `None` for
    /// nodes the batch created.
    undo: Option<HashMap<FileId, Option<Node>>>,
}

impl TreeState {
    fn new() -> Self {
        let root = FileId::from_non_zero(NonZeroU32::MIN);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Folder {
                    children: Vec::new(),
                },
                attributes: BTreeMap::new(),
            },
        );
        Self {
            nodes,
            next_id: NonZeroU32::MIN.saturating_add(1),
            root,
            undo: None,
        }
    }

    fn begin(&mut self) {
        self.undo = Some(HashMap::new());
    }

    fn commit(&mut self) {
        self.undo = None;
    }

    /// Put every touched node back as it was when the batch began.
    fn rollback(&mut self) {
        let Some(undo) = self.undo.take() else {
            return;
        };
        for (file, node) in undo {
            match node {
                Some(node) => {
                    self.nodes.insert(file, node);
                }
                None => {
                    self.nodes.remove(&file);
                }
            }
        }
    }

    fn record(&mut self, file: FileId) {
        if let Some(undo) = &mut self.undo
            && !undo.contains_key(&file)
        {
            undo.insert(file, self.nodes.get(&file).cloned());
        }
    }

    fn node(&self, file: FileId) -> FsResult<&Node> {
        self.nodes.get(&file).ok_or(FsError::InvalidFile { file })
    }

    fn node_mut(&mut self, file: FileId) -> FsResult<&mut Node> {
        self.record(file);
        self.nodes.get_mut(&file).ok_or(FsError::InvalidFile { file })
    }

    fn alloc(&mut self) -> FileId {
        let id = FileId::from_non_zero(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub fn root(&self) -> FileId {
        self.root
    }

    pub fn is_valid(&self, file: FileId) -> bool {
        self.nodes.contains_key(&file)
    }

    pub fn is_folder(&self, file: FileId) -> FsResult<bool> {
        Ok(matches!(self.node(file)?.kind, NodeKind::Folder { .. }))
    }

    pub fn name(&self, file: FileId) -> FsResult<&str> {
        Ok(&self.node(file)?.name)
    }

    pub fn parent(&self, file: FileId) -> FsResult<Option<FileId>> {
        Ok(self.node(file)?.parent)
    }

    pub fn children(&self, folder: FileId) -> FsResult<&[FileId]> {
        match &self.node(folder)?.kind {
            NodeKind::Folder { children } => Ok(children),
            NodeKind::Data { .. } => Err(FsError::NotAFolder { file: folder }),
        }
    }

    pub fn child_by_name(&self, folder: FileId, name: &str) -> FsResult<Option<FileId>> {
        let children = self.children(folder)?;
        Ok(children
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name)))
    }

    pub fn content(&self, file: FileId) -> FsResult<&[u8]> {
        match &self.node(file)?.kind {
            NodeKind::Data { content } => Ok(content),
            NodeKind::Folder { .. } => Err(FsError::NotAData { file }),
        }
    }

    pub fn attribute(&self, file: FileId, name: &str) -> FsResult<Option<&AttrValue>> {
        Ok(self.node(file)?.attributes.get(name))
    }

    pub fn path(&self, file: FileId) -> FsResult<String> {
        let mut parts = Vec::new();
        let mut current = Some(file);
        while let Some(id) = current {
            let node = self.node(id)?;
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            current = node.parent;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    pub fn resolve_path(&self, path: &str) -> FsResult<FileId> {
        let mut current = self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = self
                .child_by_name(current, part)
                .ok()
                .flatten()
                .ok_or_else(|| FsError::PathNotFound {
                    path: path.to_string(),
                })?;
        }
        Ok(current)
    }

    fn is_ancestor(&self, ancestor: FileId, file: FileId) -> bool {
        let mut current = Some(file);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn insert_child(&mut self, parent: FileId, name: &str, kind: NodeKind) -> FsResult<FileId> {
        validate_name(name)?;
        if self.child_by_name(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists {
                folder: parent,
                name: name.to_string(),
            });
        }
        let id = self.alloc();
        self.record(id);
        self.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                parent: Some(parent),
                kind,
                attributes: BTreeMap::new(),
            },
        );
        if let NodeKind::Folder { children } = &mut self.node_mut(parent)?.kind {
            children.push(id);
        }
        Ok(id)
    }

    fn detach(&mut self, file: FileId) -> FsResult<()> {
        let Some(parent) = self.node(file)?.parent else {
            return Ok(());
        };
        if let NodeKind::Folder { children } = &mut self.node_mut(parent)?.kind {
            children.retain(|c| *c != file);
        }
        Ok(())
    }

    /// Remove `file` and everything below it, deepest first.
    fn remove_subtree(&mut self, file: FileId, out: &mut Vec<FsEvent>) -> FsResult<()> {
        let children: Vec<FileId> = match &self.node(file)?.kind {
            NodeKind::Folder { children } => children.clone(),
            NodeKind::Data { .. } => Vec::new(),
        };
        for child in children {
            self.remove_subtree(child, out)?;
        }
        self.record(file);
        let node = self.nodes.remove(&file).ok_or(FsError::InvalidFile { file })?;
        out.push(FsEvent {
            file,
            parent: node.parent,
            kind: FsEventKind::Deleted,
        });
        Ok(())
    }

    fn copy_subtree(
        &mut self,
        source: FileId,
        target_parent: FileId,
        name: &str,
        out: &mut Vec<FsEvent>,
    ) -> FsResult<FileId> {
        let node = self.node(source)?.clone();
        let kind = match &node.kind {
            NodeKind::Folder { .. } => NodeKind::Folder {
                children: Vec::new(),
            },
            NodeKind::Data { content } => NodeKind::Data {
                content: content.clone(),
            },
        };
        let copy = self.insert_child(target_parent, name, kind)?;
        self.node_mut(copy)?.attributes = node.attributes.clone();
        out.push(FsEvent {
            file: copy,
            parent: Some(target_parent),
            kind: FsEventKind::Created,
        });
        if let NodeKind::Folder { children } = node.kind {
            for child in children {
                let child_name = self.name(child)?.to_string();
                self.copy_subtree(child, copy, &child_name, out)?;
            }
        }
        Ok(copy)
    }
}

/// Mutable view of the tree during one atomic operation.
///
/// Holds the tree's write lock: no other thread observes the tree until the
/// batch ends, at which point all recorded events are published together.
pub struct Batch<'a> {
    tree: &'a FileTree,
    state: RwLockWriteGuard<'a, TreeState>,
    events: Vec<FsEvent>,
}

impl Batch<'_> {
    /// Read-only access to the tree as the batch currently sees it.
    pub fn view(&self) -> &TreeState {
        &self.state
    }

    pub fn create_folder(&mut self, parent: FileId, name: &str) -> FsResult<FileId> {
        let id = self.state.insert_child(
            parent,
            name,
            NodeKind::Folder {
                children: Vec::new(),
            },
        )?;
        self.push(id, Some(parent), FsEventKind::Created);
        Ok(id)
    }

    pub fn create_file(&mut self, parent: FileId, name: &str, content: &[u8]) -> FsResult<FileId> {
        let id = self.state.insert_child(
            parent,
            name,
            NodeKind::Data {
                content: content.to_vec(),
            },
        )?;
        self.push(id, Some(parent), FsEventKind::Created);
        Ok(id)
    }

    /// Create every missing folder along `path` and return the last one.
    pub fn create_folders(&mut self, path: &str) -> FsResult<FileId> {
        let mut current = self.state.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = match self.state.child_by_name(current, part)? {
                Some(existing) => existing,
                None => self.create_folder(current, part)?,
            };
        }
        Ok(current)
    }

    /// Replace content of an unlocked file.
    pub fn write(&mut self, file: FileId, content: &[u8]) -> FsResult<()> {
        if self.tree.locks.lock().contains_key(&file) {
            return Err(FsError::Locked { file });
        }
        self.write_unchecked(file, content)
    }

    /// Replace content of a file locked by `lock`.
    pub fn write_locked(&mut self, lock: &FileLock<'_>, content: &[u8]) -> FsResult<()> {
        let file = lock.file;
        if self.tree.locks.lock().get(&file) != Some(&lock.token) {
            return Err(FsError::StaleLock { file });
        }
        self.write_unchecked(file, content)
    }

    fn write_unchecked(&mut self, file: FileId, content: &[u8]) -> FsResult<()> {
        let node = self.state.node_mut(file)?;
        match &mut node.kind {
            NodeKind::Data { content: current } => {
                *current = content.to_vec();
            }
            NodeKind::Folder { .. } => return Err(FsError::NotAData { file }),
        }
        let parent = node.parent;
        self.push(file, parent, FsEventKind::Changed);
        Ok(())
    }

    /// Delete a file, or a folder with everything below it.
    pub fn delete(&mut self, file: FileId) -> FsResult<()> {
        if file == self.state.root {
            return Err(FsError::RootOperation {
                operation: "deleted",
            });
        }
        if self.tree.locks.lock().contains_key(&file) {
            return Err(FsError::Locked { file });
        }
        self.state.detach(file)?;
        let mut removed = Vec::new();
        self.state.remove_subtree(file, &mut removed)?;
        self.events.extend(removed);
        Ok(())
    }

    pub fn rename(&mut self, file: FileId, new_name: &str) -> FsResult<()> {
        validate_name(new_name)?;
        let node = self.state.node(file)?;
        let parent = node.parent.ok_or(FsError::RootOperation {
            operation: "renamed",
        })?;
        if node.name == new_name {
            return Ok(());
        }
        if self.state.child_by_name(parent, new_name)?.is_some() {
            return Err(FsError::AlreadyExists {
                folder: parent,
                name: new_name.to_string(),
            });
        }
        let old_name = std::mem::replace(&mut self.state.node_mut(file)?.name, new_name.to_string());
        self.push(file, Some(parent), FsEventKind::Renamed { old_name });
        Ok(())
    }

    pub fn move_to(&mut self, file: FileId, target: FileId) -> FsResult<()> {
        let node = self.state.node(file)?;
        let old_parent = node.parent.ok_or(FsError::RootOperation { operation: "moved" })?;
        if old_parent == target {
            return Ok(());
        }
        if !self.state.is_folder(target)? {
            return Err(FsError::NotAFolder { file: target });
        }
        if self.state.is_ancestor(file, target) {
            return Err(FsError::CyclicMove { file });
        }
        let name = node.name.clone();
        if self.state.child_by_name(target, &name)?.is_some() {
            return Err(FsError::AlreadyExists { folder: target, name });
        }
        self.state.detach(file)?;
        self.state.node_mut(file)?.parent = Some(target);
        if let NodeKind::Folder { children } = &mut self.state.node_mut(target)?.kind {
            children.push(file);
        }
        self.push(file, Some(target), FsEventKind::Moved { old_parent });
        Ok(())
    }

    /// Deep copy `file` into `target` under `name`.
    pub fn copy_to(&mut self, file: FileId, target: FileId, name: &str) -> FsResult<FileId> {
        if self.state.is_ancestor(file, target) {
            return Err(FsError::CyclicMove { file });
        }
        let mut created = Vec::new();
        let copy = self.state.copy_subtree(file, target, name, &mut created)?;
        self.events.extend(created);
        Ok(copy)
    }

    /// Set (`Some`) or clear (`None`) an attribute.
    pub fn set_attribute(&mut self, file: FileId, name: &str, value: Option<AttrValue>) -> FsResult<()> {
        let node = self.state.node_mut(file)?;
        let changed = match value {
            Some(value) => node.attributes.insert(name.to_string(), value.clone()) != Some(value),
            None => node.attributes.remove(name).is_some(),
        };
        let parent = node.parent;
        if changed {
            self.push(
                file,
                parent,
                FsEventKind::AttributeChanged {
                    name: name.to_string(),
                },
            );
        }
        Ok(())
    }

    fn push(&mut self, file: FileId, parent: Option<FileId>, kind: FsEventKind) {
        self.events.push(FsEvent { file, parent, kind });
    }
}

/// Exclusive content lock on one file. Released on drop.
#[derive(Debug)]
pub struct FileLock<'a> {
    tree: &'a FileTree,
    file: FileId,
    token: u64,
}

impl FileLock<'_> {
    pub fn file(&self) -> FileId {
        self.file
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.tree.locks.lock();
        if locks.get(&self.file) == Some(&self.token) {
            locks.remove(&self.file);
        }
    }
}

/// The raw file source: a tree of named folders and data files.
///
/// Every mutation runs inside [`FileTree::atomic`] and is published as a
/// single [`FsEventBatch`] once the tree lock is released.
#[derive(Debug)]
pub struct FileTree {
    state: RwLock<TreeState>,
    locks: Mutex<HashMap<FileId, u64>>,
    lock_seq: AtomicU64,
    batch_seq: AtomicU64,
    events: EventHub<FsEventBatch>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TreeState::new()),
            locks: Mutex::new(HashMap::new()),
            lock_seq: AtomicU64::new(0),
            batch_seq: AtomicU64::new(0),
            events: EventHub::new("fs"),
        }
    }

    /// Change notifications, one event per atomic batch.
    pub fn events(&self) -> &EventHub<FsEventBatch> {
        &self.events
    }

    /// Run `op` as one atomic batch.
    ///
    /// If `op` returns an error every change it made is rolled back and no
    /// event is published. `op` must not call back into this tree: it
    /// already holds the write lock, use the [`Batch`] it receives instead.
    pub fn atomic<T>(&self, op: impl FnOnce(&mut Batch<'_>) -> FsResult<T>) -> FsResult<T> {
        let (result, events) = {
            let mut state = self.state.write();
            state.begin();
            let mut batch = Batch {
                tree: self,
                state,
                events: Vec::new(),
            };
            let result = op(&mut batch);
            if result.is_ok() {
                batch.state.commit();
            } else {
                batch.state.rollback();
                batch.events.clear();
            }
            (result, batch.events)
        };

        if !events.is_empty() {
            let seq = self.batch_seq.fetch_add(1, Ordering::SeqCst) + 1;
            crate::debug_event!("fs", "batch", "#{seq} with {} events", events.len());
            self.events.send(FsEventBatch::new(seq, events));
        }
        result
    }

    /// Shared read access for several queries against one consistent state.
    pub fn read(&self) -> RwLockReadGuard<'_, TreeState> {
        self.state.read_recursive()
    }

    pub fn root(&self) -> FileId {
        self.read().root()
    }

    pub fn create_folder(&self, parent: FileId, name: &str) -> FsResult<FileId> {
        self.atomic(|b| b.create_folder(parent, name))
    }

    pub fn create_file(&self, parent: FileId, name: &str, content: &[u8]) -> FsResult<FileId> {
        self.atomic(|b| b.create_file(parent, name, content))
    }

    pub fn create_folders(&self, path: &str) -> FsResult<FileId> {
        self.atomic(|b| b.create_folders(path))
    }

    pub fn write(&self, lock: &FileLock<'_>, content: &[u8]) -> FsResult<()> {
        self.atomic(|b| b.write_locked(lock, content))
    }

    pub fn delete(&self, file: FileId) -> FsResult<()> {
        self.atomic(|b| b.delete(file))
    }

    pub fn rename(&self, file: FileId, new_name: &str) -> FsResult<()> {
        self.atomic(|b| b.rename(file, new_name))
    }

    pub fn move_to(&self, file: FileId, target: FileId) -> FsResult<()> {
        self.atomic(|b| b.move_to(file, target))
    }

    pub fn copy_to(&self, file: FileId, target: FileId, name: &str) -> FsResult<FileId> {
        self.atomic(|b| b.copy_to(file, target, name))
    }

    pub fn set_attribute(&self, file: FileId, name: &str, value: impl Into<AttrValue>) -> FsResult<()> {
        let value = value.into();
        self.atomic(|b| b.set_attribute(file, name, Some(value)))
    }

    pub fn remove_attribute(&self, file: FileId, name: &str) -> FsResult<()> {
        self.atomic(|b| b.set_attribute(file, name, None))
    }

    /// Take the exclusive content lock on `file`.
    pub fn lock(&self, file: FileId) -> FsResult<FileLock<'_>> {
        if self.read().is_folder(file)? {
            return Err(FsError::NotAData { file });
        }
        let mut locks = self.locks.lock();
        if locks.contains_key(&file) {
            return Err(FsError::Locked { file });
        }
        let token = self.lock_seq.fetch_add(1, Ordering::SeqCst) + 1;
        locks.insert(file, token);
        Ok(FileLock {
            tree: self,
            file,
            token,
        })
    }

    pub fn is_locked(&self, file: FileId) -> bool {
        self.locks.lock().contains_key(&file)
    }

    pub fn is_valid(&self, file: FileId) -> bool {
        self.read().is_valid(file)
    }

    pub fn is_folder(&self, file: FileId) -> FsResult<bool> {
        self.read().is_folder(file)
    }

    pub fn name(&self, file: FileId) -> FsResult<String> {
        self.read().name(file).map(str::to_string)
    }

    /// Name without the extension.
    pub fn base_name(&self, file: FileId) -> FsResult<String> {
        let state = self.read();
        Ok(split_name(state.name(file)?).0.to_string())
    }

    pub fn extension(&self, file: FileId) -> FsResult<Option<String>> {
        let state = self.read();
        Ok(split_name(state.name(file)?).1.map(str::to_string))
    }

    pub fn parent(&self, file: FileId) -> FsResult<Option<FileId>> {
        self.read().parent(file)
    }

    /// Children in enumeration (insertion) order.
    pub fn children(&self, folder: FileId) -> FsResult<Vec<FileId>> {
        self.read().children(folder).map(<[FileId]>::to_vec)
    }

    pub fn child_by_name(&self, folder: FileId, name: &str) -> FsResult<Option<FileId>> {
        self.read().child_by_name(folder, name)
    }

    /// Sibling of `file` named `name`, if any.
    pub fn sibling_by_name(&self, file: FileId, name: &str) -> FsResult<Option<FileId>> {
        let state = self.read();
        match state.parent(file)? {
            Some(parent) => state.child_by_name(parent, name),
            None => Ok(None),
        }
    }

    pub fn content(&self, file: FileId) -> FsResult<Vec<u8>> {
        self.read().content(file).map(<[u8]>::to_vec)
    }

    pub fn size(&self, file: FileId) -> FsResult<usize> {
        self.read().content(file).map(<[u8]>::len)
    }

    pub fn attribute(&self, file: FileId, name: &str) -> FsResult<Option<AttrValue>> {
        self.read().attribute(file, name).map(|a| a.cloned())
    }

    /// Slash-separated path from the root; the root itself is `""`.
    pub fn path(&self, file: FileId) -> FsResult<String> {
        self.read().path(file)
    }

    pub fn resolve_path(&self, path: &str) -> FsResult<FileId> {
        self.read().resolve_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.txt"), ("a", Some("txt")));
        assert_eq!(split_name("a.tar.gz"), ("a.tar", Some("gz")));
        assert_eq!(split_name(".hidden"), (".hidden", None));
        assert_eq!(split_name("Makefile"), ("Makefile", None));
    }

    #[test]
    fn test_create_and_resolve() {
        let tree = FileTree::new();
        let src = tree.create_folders("project/src").unwrap();
        let main = tree.create_file(src, "main.rs", b"fn main() {}").unwrap();

        assert_eq!(tree.path(main).unwrap(), "project/src/main.rs");
        assert_eq!(tree.resolve_path("project/src/main.rs").unwrap(), main);
        assert_eq!(tree.base_name(main).unwrap(), "main");
        assert_eq!(tree.extension(main).unwrap().as_deref(), Some("rs"));
        assert_eq!(tree.content(main).unwrap(), b"fn main() {}");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let tree = FileTree::new();
        let root = tree.root();
        tree.create_file(root, "a.txt", b"").unwrap();
        let err = tree.create_file(root, "a.txt", b"").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
    }

    #[test]
    fn test_children_keep_enumeration_order() {
        let tree = FileTree::new();
        let root = tree.root();
        let b = tree.create_file(root, "b", b"").unwrap();
        let a = tree.create_file(root, "a", b"").unwrap();
        let c = tree.create_file(root, "c", b"").unwrap();
        assert_eq!(tree.children(root).unwrap(), vec![b, a, c]);
    }

    #[test]
    fn test_atomic_batch_emits_one_event() {
        let tree = FileTree::new();
        let rx = tree.events().subscribe();
        let root = tree.root();

        tree.atomic(|b| {
            b.create_file(root, "a.pri", b"")?;
            b.create_file(root, "a.sec", b"")?;
            Ok(())
        })
        .unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_batch_rolls_back_silently() {
        let tree = FileTree::new();
        let root = tree.root();
        let dir = tree.create_folder(root, "dir").unwrap();
        let a = tree.create_file(root, "a.txt", b"old").unwrap();
        let b = tree.create_file(dir, "b.txt", b"").unwrap();
        let rx = tree.events().subscribe();

        let err = tree
            .atomic(|batch| {
                batch.write(a, b"new")?;
                batch.set_attribute(a, "k", Some(AttrValue::from(true)))?;
                batch.create_file(dir, "c.txt", b"")?;
                batch.delete(b)?;
                batch.move_to(a, dir)?;
                batch.rename(a, "c.txt")
            })
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));

        assert!(rx.try_recv().is_err());
        assert_eq!(tree.path(a).unwrap(), "a.txt");
        assert_eq!(tree.content(a).unwrap(), b"old");
        assert_eq!(tree.attribute(a, "k").unwrap(), None);
        assert!(tree.is_valid(b));
        assert_eq!(tree.children(dir).unwrap(), vec![b]);
        assert_eq!(tree.child_by_name(dir, "c.txt").unwrap(), None);

        // the next batch publishes normally
        tree.rename(a, "d.txt").unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[test]
    fn test_ids_stable_across_rename_and_move() {
        let tree = FileTree::new();
        let root = tree.root();
        let dir = tree.create_folder(root, "dir").unwrap();
        let file = tree.create_file(root, "a.txt", b"x").unwrap();

        tree.rename(file, "b.txt").unwrap();
        tree.move_to(file, dir).unwrap();

        assert_eq!(tree.path(file).unwrap(), "dir/b.txt");
        assert_eq!(tree.children(root).unwrap(), vec![dir]);
    }

    #[test]
    fn test_delete_is_recursive_and_permanent() {
        let tree = FileTree::new();
        let dir = tree.create_folders("a/b").unwrap();
        let file = tree.create_file(dir, "x", b"").unwrap();
        let a = tree.resolve_path("a").unwrap();

        tree.delete(a).unwrap();

        assert!(!tree.is_valid(a));
        assert!(!tree.is_valid(dir));
        assert!(!tree.is_valid(file));
        let again = tree.create_folder(tree.root(), "a").unwrap();
        assert_ne!(again, a);
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let tree = FileTree::new();
        let outer = tree.create_folders("outer/inner").unwrap();
        let top = tree.resolve_path("outer").unwrap();
        assert!(matches!(
            tree.move_to(top, outer),
            Err(FsError::CyclicMove { .. })
        ));
    }

    #[test]
    fn test_lock_guards_content() {
        let tree = FileTree::new();
        let file = tree.create_file(tree.root(), "a", b"old").unwrap();

        let lock = tree.lock(file).unwrap();
        assert!(matches!(tree.lock(file), Err(FsError::Locked { .. })));
        assert!(matches!(
            tree.atomic(|b| b.write(file, b"x")),
            Err(FsError::Locked { .. })
        ));
        tree.write(&lock, b"new").unwrap();
        drop(lock);

        assert!(!tree.is_locked(file));
        assert_eq!(tree.content(file).unwrap(), b"new");
    }

    #[test]
    fn test_copy_is_deep() {
        let tree = FileTree::new();
        let src = tree.create_folders("src/nested").unwrap();
        tree.create_file(src, "f", b"data").unwrap();
        let dst = tree.create_folder(tree.root(), "dst").unwrap();
        let top = tree.resolve_path("src").unwrap();

        let copy = tree.copy_to(top, dst, "copy").unwrap();

        assert_eq!(tree.path(copy).unwrap(), "dst/copy");
        let f = tree.resolve_path("dst/copy/nested/f").unwrap();
        assert_eq!(tree.content(f).unwrap(), b"data");
    }

    #[test]
    fn test_unchanged_attribute_emits_nothing() {
        let tree = FileTree::new();
        let file = tree.create_file(tree.root(), "a", b"").unwrap();
        tree.set_attribute(file, "k", "v").unwrap();
        let rx = tree.events().subscribe();

        tree.set_attribute(file, "k", "v").unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(tree.attribute(file, "k").unwrap(), Some(AttrValue::from("v")));
    }
}
