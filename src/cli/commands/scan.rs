//! Scan command: mirror a directory once and list what was recognized.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;

use crate::config::Settings;
use crate::fs::FileTree;
use crate::object::{FacetKind, TypedObject};
use crate::system::DataSystem;
use crate::types::FileId;
use crate::watcher::DiskMirror;

/// One recognized object as shown to the user.
#[derive(Debug, Serialize)]
pub struct ObjectRow {
    pub path: String,
    pub type_name: String,
    pub recognizer: String,
    pub files: Vec<String>,
    pub facets: Vec<FacetKind>,
    pub modified: bool,
}

impl ObjectRow {
    pub fn describe(fs: &FileTree, object: &TypedObject) -> Self {
        let label = |file: FileId| fs.path(file).unwrap_or_else(|_| format!("<{file}>"));
        Self {
            path: label(object.primary()),
            type_name: object.type_name().to_string(),
            recognizer: object.recognizer().to_string(),
            files: object.files().into_iter().map(label).collect(),
            facets: object.facets().kinds().collect(),
            modified: object.is_modified(),
        }
    }
}

/// Mirror `dir` and assemble a recognition system over it.
pub fn open(dir: &Path, settings: &Settings) -> anyhow::Result<(Arc<DiskMirror>, DataSystem)> {
    let tree = Arc::new(FileTree::new());
    let mirror = DiskMirror::import(dir, Arc::clone(&tree), &settings.watch)
        .with_context(|| format!("cannot mirror {}", dir.display()))?;
    let system = DataSystem::with_tree(tree, settings).context("invalid recognizer configuration")?;
    Ok((Arc::new(mirror), system))
}

pub fn run(dir: &Path, recursive: bool, json: bool, settings: &Settings) -> anyhow::Result<()> {
    let (mirror, system) = open(dir, settings)?;
    let task = system.folder(system.fs().root())?;
    let objects = if recursive {
        task.children_recursive()
    } else {
        task.wait().objects()
    };
    let rows: Vec<ObjectRow> = objects
        .iter()
        .map(|object| ObjectRow::describe(system.fs(), object))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Path", "Type", "Recognizer", "Files", "Facets"]);
    for row in &rows {
        let facets: Vec<String> = row
            .facets
            .iter()
            .map(|kind| format!("{kind:?}").to_lowercase())
            .collect();
        table.add_row(vec![
            row.path.clone(),
            row.type_name.clone(),
            row.recognizer.clone(),
            row.files.len().to_string(),
            facets.join(", "),
        ]);
    }
    println!("{table}");
    println!("{} objects in {}", rows.len(), mirror.root().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rows_describe_grouped_objects() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let (_mirror, system) = open(dir.path(), &Settings::default()).unwrap();
        let children = system.folder(system.fs().root()).unwrap().wait();
        let rows: Vec<ObjectRow> = children
            .iter()
            .map(|object| ObjectRow::describe(system.fs(), object))
            .collect();

        let rust = rows.iter().find(|row| row.path == "main.rs").unwrap();
        assert_eq!(rust.type_name, "rust-source");
        assert!(rust.facets.contains(&FacetKind::Edit));
        let text = rows.iter().find(|row| row.path == "notes.txt").unwrap();
        assert_eq!(text.recognizer, "text");
    }
}
