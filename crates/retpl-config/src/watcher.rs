//! Bridge between the filesystem watcher and the store
//!
//! Raw watcher events are pushed into a channel and consumed by a
//! dedicated dispatcher thread, which reloads the store. Handlers
//! registered on the store therefore run on that thread, never on the
//! caller's.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::loader::ConfigError;
use crate::store::ConfigStore;

/// Keeps the underlying watcher alive for the process lifetime
pub(crate) struct WatchGuard {
    _watcher: RecommendedWatcher,
}

/// Watch `path` and reload `store` whenever the file changes
pub(crate) fn spawn(store: ConfigStore, path: PathBuf) -> Result<WatchGuard, ConfigError> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let _ = tx.send(result);
    })?;
    // Editors replace files instead of writing them in place, so the
    // parent directory is watched and events are filtered by file name.
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    thread::Builder::new()
        .name("retpl-config-watch".into())
        .spawn(move || dispatch(store, path, rx))
        .map_err(|err| ConfigError::Watch(notify::Error::io(err)))?;
    Ok(WatchGuard { _watcher: watcher })
}

fn dispatch(store: ConfigStore, path: PathBuf, rx: mpsc::Receiver<notify::Result<Event>>) {
    for result in rx {
        match result {
            Ok(event) if is_relevant(&event, &path) => {
                debug!(path = %path.display(), kind = ?event.kind, "watched configuration file changed");
                store.reload();
            }
            Ok(_) => {}
            Err(err) => warn!("configuration watcher error: {err}"),
        }
    }
}

fn is_relevant(event: &Event, path: &Path) -> bool {
    if !(event.kind.is_create() || event.kind.is_modify()) {
        return false;
    }
    let target = path.file_name();
    event.paths.iter().any(|p| p.file_name() == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};

    fn event_for(kind: EventKind, file: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(file))
    }

    #[test]
    fn test_relevance_by_kind_and_name() {
        let watched = Path::new("/etc/retpl/config.yaml");

        let modify = event_for(
            EventKind::Modify(ModifyKind::Any),
            "/etc/retpl/config.yaml",
        );
        assert!(is_relevant(&modify, watched));

        let create = event_for(
            EventKind::Create(CreateKind::File),
            "/etc/retpl/config.yaml",
        );
        assert!(is_relevant(&create, watched));

        let remove = event_for(
            EventKind::Remove(RemoveKind::File),
            "/etc/retpl/config.yaml",
        );
        assert!(!is_relevant(&remove, watched));

        let sibling = event_for(EventKind::Modify(ModifyKind::Any), "/etc/retpl/other.yaml");
        assert!(!is_relevant(&sibling, watched));
    }
}
