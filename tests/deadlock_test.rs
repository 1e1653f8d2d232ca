use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use datapool::folder::FolderPool;
use datapool::object::ObjectSpec;
use datapool::recognize::{
    BuildContext, Claim, ExamineContext, PrimaryFileGroup, RecognitionError, Recognizer,
};
use datapool::{DataSystem, FileId, RecognizerId};

/// Builds `*.dep` objects by listing their own folder first.
struct FolderDependent {
    pool: OnceLock<Weak<FolderPool>>,
    started: crossbeam_channel::Sender<()>,
}

impl Recognizer for FolderDependent {
    fn id(&self) -> RecognizerId {
        RecognizerId::from("folder-dependent")
    }

    fn examine(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Claim> {
        let name = cx.fs.name(file).ok()?;
        name.ends_with(".dep")
            .then(|| Claim::Primary(PrimaryFileGroup::single(file)))
    }

    fn build(&self, cx: &BuildContext<'_>, group: &PrimaryFileGroup) -> Result<ObjectSpec, RecognitionError> {
        let fail = |reason: String| RecognitionError::failed(&self.id(), reason);
        let _ = self.started.send(());
        // Let the folder scan reach this object's construction slot.
        thread::sleep(Duration::from_millis(200));

        let pool = self
            .pool
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| fail("no folder pool".to_string()))?;
        let parent = cx
            .fs
            .parent(group.primary)
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| fail("no parent".to_string()))?;
        pool.task(parent).map_err(|e| fail(e.to_string()))?.wait();
        Ok(ObjectSpec::new("dependent"))
    }
}

#[test]
fn folder_scan_and_reentrant_construction_do_not_hang() {
    let system = DataSystem::new();
    let (started_tx, started_rx) = unbounded();
    let recognizer = Arc::new(FolderDependent {
        pool: OnceLock::new(),
        started: started_tx,
    });
    let _ = recognizer.pool.set(Arc::downgrade(system.folders()));
    system.chain().install(Arc::clone(&recognizer) as Arc<dyn Recognizer>).unwrap();

    let fs = system.fs();
    let folder = fs.create_folder(fs.root(), "work").unwrap();
    fs.create_file(folder, "plain.txt", b"").unwrap();
    let dep = fs.create_file(folder, "job.dep", b"").unwrap();

    let (done_tx, done_rx) = bounded(1);
    let registry = Arc::clone(system.registry());
    thread::spawn(move || {
        let _ = done_tx.send(registry.find(dep).map(|o| o.type_name().to_string()));
    });

    // Start the folder scan while the caller is inside construction.
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let task = system.folder(folder).unwrap();

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("construction hung");
    assert_eq!(outcome.unwrap(), "dependent");
    assert!(system.registry().diagnostics().deadlock_warnings() > 0);

    // The folder settles and eventually lists the real object.
    let mut listed = false;
    for _ in 0..100 {
        let children = task.wait();
        if children
            .iter()
            .any(|o| o.primary() == dep && !o.is_placeholder() && o.type_name() == "dependent")
        {
            listed = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(listed, "folder never listed the finished object");
}
