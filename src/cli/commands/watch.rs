//! Watch command: keep a directory mirrored and report object changes.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use crossbeam_channel::Receiver;

use crate::config::Settings;
use crate::folder::FolderPool;
use crate::fs::FileTree;
use crate::object::{Facet, FacetKind};
use crate::registry::ObjectEvent;
use crate::watcher::MirrorWatcher;

use super::scan::{ObjectRow, open};

pub async fn run(dir: &Path, settings: &Settings) -> anyhow::Result<()> {
    let (mirror, system) = open(dir, settings)?;
    let events = system.registry().events().subscribe();

    // Recognize everything once so every folder has a live task.
    let initial = system.folder(system.fs().root())?.children_recursive();
    println!("Watching {} ({} objects)", mirror.root().display(), initial.len());
    println!("Press Ctrl+C to stop");

    let fs = Arc::clone(system.fs());
    let folders = Arc::clone(system.folders());
    thread::Builder::new()
        .name("datapool-report".to_string())
        .spawn(move || report(events, &fs, &folders))
        .context("cannot start reporter thread")?;

    let watcher = MirrorWatcher::new(Arc::clone(&mirror), settings.watch.debounce_ms)?;
    tokio::select! {
        result = watcher.watch() => result?,
        _ = tokio::signal::ctrl_c() => {
            crate::log_event!("watcher", "stopped");
        }
    }
    Ok(())
}

fn report(events: Receiver<ObjectEvent>, fs: &FileTree, folders: &FolderPool) {
    for event in events {
        let row = ObjectRow::describe(fs, event.object());
        match &event {
            ObjectEvent::Created(object) => {
                println!("+ {} [{}]", row.path, row.type_name);
                if let Some(Facet::Container { folder }) = object.facets().get(FacetKind::Container)
                    && let Err(e) = folders.task(*folder)
                {
                    crate::warn_event!("watch", "cannot follow {}: {e}", row.path);
                }
            }
            ObjectEvent::Invalidated(_) => println!("- {} [{}]", row.path, row.type_name),
            ObjectEvent::FilesChanged(_) => println!("~ {} ({} files)", row.path, row.files.len()),
            ObjectEvent::ModifiedChanged { modified, .. } => {
                println!("* {} modified={modified}", row.path)
            }
        }
    }
}
