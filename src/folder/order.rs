//! Ordering of a folder's recognized children.
//!
//! Two folder attributes drive it:
//! - `order`: `/`-separated child names that come first, in that order
//! - `sort-mode`: one letter selecting how the rest is sorted
//!
//! Every comparison ends with the primary file's name and id, so the result
//! is a total order that no other attribute can disturb.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fs::{AttrValue, FsResult, TreeState, split_name};
use crate::object::TypedObject;
use crate::types::FileId;

pub const ORDER_ATTR: &str = "order";
pub const SORT_MODE_ATTR: &str = "sort-mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortMode {
    /// Enumeration order of the file tree.
    #[default]
    None,
    Names,
    FoldersFirst,
    Extensions,
    Types,
}

impl SortMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'O' => Some(SortMode::None),
            'N' => Some(SortMode::Names),
            'F' => Some(SortMode::FoldersFirst),
            'X' => Some(SortMode::Extensions),
            'C' => Some(SortMode::Types),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            SortMode::None => 'O',
            SortMode::Names => 'N',
            SortMode::FoldersFirst => 'F',
            SortMode::Extensions => 'X',
            SortMode::Types => 'C',
        }
    }
}

impl From<SortMode> for AttrValue {
    fn from(mode: SortMode) -> Self {
        AttrValue::Text(mode.as_char().to_string())
    }
}

/// Whether an attribute name influences child order.
pub fn is_ordering_attribute(name: &str) -> bool {
    name == ORDER_ATTR || name == SORT_MODE_ATTR
}

/// `order` attribute value for the given child names.
pub fn order_value<S: AsRef<str>>(names: &[S]) -> AttrValue {
    let joined = names.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/");
    AttrValue::Text(joined)
}

/// Ordering settings read from one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildOrder {
    pub explicit: Vec<String>,
    pub mode: SortMode,
}

struct SortKey<'a> {
    rank: Option<usize>,
    index: usize,
    folder: bool,
    name: &'a str,
    ext: &'a str,
    type_name: String,
    file: FileId,
}

impl ChildOrder {
    pub fn of_folder(view: &TreeState, folder: FileId) -> FsResult<Self> {
        let explicit = view
            .attribute(folder, ORDER_ATTR)?
            .and_then(AttrValue::as_str)
            .map(|value| {
                value
                    .split('/')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mode = view
            .attribute(folder, SORT_MODE_ATTR)?
            .and_then(AttrValue::as_str)
            .and_then(|value| value.chars().next())
            .and_then(SortMode::from_char)
            .unwrap_or_default();

        Ok(Self { explicit, mode })
    }

    /// Sort `objects` in place. `listing` is the folder's enumeration order.
    pub fn sort(&self, view: &TreeState, listing: &[FileId], objects: &mut [Arc<TypedObject>]) {
        let ranks: HashMap<&str, usize> = self
            .explicit
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let positions: HashMap<FileId, usize> = listing.iter().enumerate().map(|(i, f)| (*f, i)).collect();

        let mut keyed: Vec<(SortKey<'_>, Arc<TypedObject>)> = objects
            .iter()
            .map(|object| {
                let file = object.primary();
                let name = view.name(file).unwrap_or("");
                let key = SortKey {
                    rank: ranks.get(name).copied(),
                    index: positions.get(&file).copied().unwrap_or(usize::MAX),
                    folder: view.is_folder(file).unwrap_or(false),
                    name,
                    ext: split_name(name).1.unwrap_or(""),
                    type_name: object.type_name().to_string(),
                    file,
                };
                (key, Arc::clone(object))
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| self.compare(a, b));

        for (slot, (_, object)) in objects.iter_mut().zip(keyed) {
            *slot = object;
        }
    }

    fn compare(&self, a: &SortKey<'_>, b: &SortKey<'_>) -> Ordering {
        // Explicitly ordered names come first.
        let explicit = match (a.rank, b.rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        let by_mode = match self.mode {
            SortMode::None => a.index.cmp(&b.index),
            SortMode::Names => Ordering::Equal,
            SortMode::FoldersFirst => b.folder.cmp(&a.folder),
            SortMode::Extensions => a.ext.cmp(b.ext),
            SortMode::Types => a.type_name.cmp(&b.type_name),
        };

        explicit
            .then(by_mode)
            .then_with(|| a.name.cmp(b.name))
            .then_with(|| a.file.cmp(&b.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileTree;

    #[test]
    fn test_parse_folder_attributes() {
        let fs = FileTree::new();
        let folder = fs.create_folder(fs.root(), "f").unwrap();
        fs.set_attribute(folder, ORDER_ATTR, order_value(&["b.txt", "a.txt"]))
            .unwrap();
        fs.set_attribute(folder, SORT_MODE_ATTR, SortMode::FoldersFirst)
            .unwrap();

        let order = ChildOrder::of_folder(&fs.read(), folder).unwrap();
        assert_eq!(order.explicit, vec!["b.txt", "a.txt"]);
        assert_eq!(order.mode, SortMode::FoldersFirst);
    }

    #[test]
    fn test_unknown_sort_mode_falls_back() {
        let fs = FileTree::new();
        let folder = fs.create_folder(fs.root(), "f").unwrap();
        fs.set_attribute(folder, SORT_MODE_ATTR, "?").unwrap();

        let order = ChildOrder::of_folder(&fs.read(), folder).unwrap();
        assert_eq!(order.mode, SortMode::None);
        assert!(is_ordering_attribute("sort-mode"));
        assert!(!is_ordering_attribute("template"));
    }

    #[test]
    fn test_sort_mode_chars_round_trip() {
        for c in ['O', 'N', 'F', 'X', 'C'] {
            assert_eq!(SortMode::from_char(c).unwrap().as_char(), c);
        }
    }
}
