//! File watcher: keeps the index in step with the disk.
//!
//! Watches the project root (debounced); when an indexed file changes it is
//! re-enqueued with its last-known compile arguments, and when it
//! disappears it is invalidated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use tracing::{debug, info, warn};

use crate::frontend::CompileCommand;
use crate::parse_worker::ParseHandle;

const DEBOUNCE_MS: u64 = 200;

/// Directories never worth watching.
const IGNORED_DIRS: &[&str] = &[".git", ".cxref", "build", "target", "node_modules"];

/// Handle that keeps the watcher alive. Drop it to stop watching.
pub struct WatcherHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

/// Start watching `root` recursively. `indexed` is the shared map of added
/// files and their compile arguments; only files in it trigger work.
pub fn start_watching(
    root: &Path,
    indexed: Arc<Mutex<HashMap<PathBuf, CompileCommand>>>,
    parse: ParseHandle,
) -> Result<WatcherHandle, notify::Error> {
    let mut debouncer = new_debouncer(
        Duration::from_millis(DEBOUNCE_MS),
        move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
            Ok(events) => handle_events(&events, &indexed, &parse),
            Err(err) => warn!(error = %err, "file watcher error"),
        },
    )?;
    debouncer
        .watcher()
        .watch(root, notify::RecursiveMode::Recursive)?;
    info!(root = %root.display(), debounce_ms = DEBOUNCE_MS, "watching for changes");
    Ok(WatcherHandle {
        _debouncer: debouncer,
    })
}

fn handle_events(
    events: &[DebouncedEvent],
    indexed: &Arc<Mutex<HashMap<PathBuf, CompileCommand>>>,
    parse: &ParseHandle,
) {
    for event in events {
        if event.kind != DebouncedEventKind::Any || should_ignore(&event.path) {
            continue;
        }
        let args = match indexed.lock() {
            Ok(indexed) => match indexed.get(&event.path) {
                Some(args) => args.clone(),
                None => continue,
            },
            Err(_) => return,
        };
        if event.path.exists() {
            debug!(file = %event.path.display(), "re-indexing changed file");
            parse.add_file(event.path.clone(), args);
        } else {
            debug!(file = %event.path.display(), "invalidating deleted file");
            parse.invalidate(event.path.clone());
        }
    }
}

fn should_ignore(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(component, std::path::Component::Normal(name)
            if IGNORED_DIRS.iter().any(|dir| name.to_string_lossy() == *dir))
    })
}
