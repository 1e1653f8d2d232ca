use std::sync::Arc;
use std::time::Duration;

use datapool::folder::{ORDER_ATTR, SORT_MODE_ATTR, SortMode, order_value};
use datapool::{DataSystem, FolderChildren, FolderRecognitionTask, TypedObject};

fn next_publication(task: &FolderRecognitionTask, after: u64) -> Arc<FolderChildren> {
    for _ in 0..200 {
        let children = task.wait();
        if children.generation() > after {
            return children;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("no publication after generation {after}");
}

fn names(system: &DataSystem, children: &FolderChildren) -> Vec<String> {
    children
        .iter()
        .map(|o| system.fs().name(o.primary()).unwrap())
        .collect()
}

#[test]
fn explicit_order_keeps_child_identities() {
    let system = DataSystem::new();
    let fs = system.fs();
    let folder = fs.create_folder(fs.root(), "docs").unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs.create_file(folder, name, b"").unwrap();
    }
    let task = system.folder(folder).unwrap();
    let before = task.wait();
    assert_eq!(names(&system, &before), vec!["a.txt", "b.txt", "c.txt"]);

    fs.set_attribute(folder, ORDER_ATTR, order_value(&["c.txt", "a.txt"]))
        .unwrap();
    let after = next_publication(&task, before.generation());

    let mut expected: Vec<Arc<TypedObject>> = before.objects();
    let rank = |o: &Arc<TypedObject>| match fs.name(o.primary()).unwrap().as_str() {
        "c.txt" => 0,
        "a.txt" => 1,
        _ => 2,
    };
    expected.sort_by_key(rank);

    let actual = after.objects();
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(&expected) {
        assert!(Arc::ptr_eq(a, e));
    }
}

#[test]
fn unrelated_attribute_does_not_rescan() {
    let system = DataSystem::new();
    let fs = system.fs();
    let folder = fs.create_folder(fs.root(), "docs").unwrap();
    fs.create_file(folder, "b.txt", b"").unwrap();
    fs.create_file(folder, "a.txt", b"").unwrap();
    fs.set_attribute(folder, SORT_MODE_ATTR, SortMode::Names).unwrap();

    let task = system.folder(folder).unwrap();
    let before = task.wait();
    assert_eq!(names(&system, &before), vec!["a.txt", "b.txt"]);
    let scans = task.scans();

    fs.set_attribute(folder, "color", "blue").unwrap();
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(task.scans(), scans);
    assert!(Arc::ptr_eq(&task.wait(), &before));
}
