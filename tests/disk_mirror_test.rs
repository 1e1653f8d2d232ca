use std::fs;
use std::sync::Arc;
use std::time::Duration;

use datapool::config::{RecognizerConfig, Settings};
use datapool::{DataSystem, DiskMirror, FileTree};
use tempfile::TempDir;

fn form_settings() -> Settings {
    let mut settings = Settings::default();
    settings.recognizers.insert(
        "form".to_string(),
        RecognizerConfig {
            enabled: true,
            priority: 5,
            patterns: vec!["*.form".to_string()],
            secondary_extensions: vec!["java".to_string()],
            ..RecognizerConfig::default()
        },
    );
    settings
}

#[test]
fn mirrored_directory_is_recognized_with_groups() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("ui")).unwrap();
    fs::write(dir.path().join("ui/Main.form"), "<form/>").unwrap();
    fs::write(dir.path().join("ui/Main.java"), "class Main {}").unwrap();
    fs::write(dir.path().join("ui/notes.txt"), "todo").unwrap();

    let settings = form_settings();
    let tree = Arc::new(FileTree::new());
    let mirror = DiskMirror::import(dir.path(), Arc::clone(&tree), &settings.watch).unwrap();
    let system = DataSystem::with_tree(Arc::clone(&tree), &settings).unwrap();

    let java = mirror.file(&mirror.root().join("ui/Main.java")).unwrap();
    let object = system.find(java).unwrap();
    assert_eq!(object.type_name(), "form");
    assert_eq!(object.files().len(), 2);

    let ui = tree.resolve_path("ui").unwrap();
    let children = system.folder(ui).unwrap().wait();
    let types: Vec<&str> = children.iter().map(|o| o.type_name()).collect();
    assert_eq!(types, vec!["form", "text"]);
}

#[test]
fn applied_disk_changes_reach_the_folder() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "a").unwrap();

    let settings = Settings::default();
    let tree = Arc::new(FileTree::new());
    let mirror = DiskMirror::import(dir.path(), Arc::clone(&tree), &settings.watch).unwrap();
    let system = DataSystem::with_tree(Arc::clone(&tree), &settings).unwrap();
    let task = system.folder(tree.root()).unwrap();
    assert_eq!(task.wait().len(), 1);
    let events = task.events().subscribe();

    fs::write(dir.path().join("b.txt"), "b").unwrap();
    mirror.apply_created(&mirror.root().join("b.txt")).unwrap();

    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.added().len(), 1);
    assert_eq!(task.wait().len(), 2);

    let a = mirror.file(&mirror.root().join("a.txt")).unwrap();
    let object = system.find(a).unwrap();
    fs::remove_file(dir.path().join("a.txt")).unwrap();
    mirror.apply_removed(&mirror.root().join("a.txt")).unwrap();
    assert!(!object.is_valid());
}
