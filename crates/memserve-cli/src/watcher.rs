//! Source directory watcher.
//!
//! `notify` events are forwarded as [`FileChange`]s. [`PendingChanges`]
//! holds them per path until the path has been quiet for the debounce
//! window, so a burst of writes to one file becomes a single store write
//! carrying the final contents.

use crate::error::{CliError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Quiet period before a changed path is synced.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }

    fn from_event(kind: &EventKind, path: PathBuf) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FileChange::Created(path)),
            EventKind::Modify(_) => Some(FileChange::Modified(path)),
            EventKind::Remove(_) => Some(FileChange::Removed(path)),
            _ => None,
        }
    }
}

/// Recursive watcher over the mirrored directory.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`. Changes arrive on the returned receiver until
    /// the watcher is dropped.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if `root` does not exist, `Watch` if the platform
    /// watcher cannot be created.
    pub fn new(root: PathBuf) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        if !root.exists() {
            return Err(CliError::FileNotFound(root));
        }

        let (tx, rx) = mpsc::channel(256);
        let callback_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "watch error");
                    return;
                }
            };

            for path in event.paths {
                if !path.starts_with(&callback_root) {
                    continue;
                }
                if let Some(change) = FileChange::from_event(&event.kind, path) {
                    // Receiver gone means we are shutting down.
                    let _ = tx.blocking_send(change);
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "watching");

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Changes waiting out their debounce window, latest event per path.
#[derive(Debug)]
pub struct PendingChanges {
    window: Duration,
    entries: HashMap<PathBuf, (FileChange, Instant)>,
}

impl PendingChanges {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Record `change`, restarting its path's window.
    pub fn push(&mut self, change: FileChange, now: Instant) {
        let due = now + self.window;
        self.entries.insert(change.path().to_path_buf(), (change, due));
    }

    /// When the earliest pending path becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|(_, due)| *due).min()
    }

    /// Remove and return every change due at `now`, ordered by path.
    pub fn take_due(&mut self, now: Instant) -> Vec<FileChange> {
        let due: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut changes: Vec<FileChange> = due
            .into_iter()
            .filter_map(|path| self.entries.remove(&path).map(|(change, _)| change))
            .collect();
        changes.sort_by(|a, b| a.path().cmp(b.path()));
        changes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WINDOW: Duration = Duration::from_millis(50);

    #[test]
    fn test_file_change_path() {
        let path = PathBuf::from("/site/index.html");
        assert_eq!(FileChange::Modified(path.clone()).path(), path.as_path());
        assert_eq!(FileChange::Created(path.clone()).path(), path.as_path());
        assert_eq!(FileChange::Removed(path.clone()).path(), path.as_path());
    }

    #[test]
    fn test_from_event_ignores_access() {
        let kind = EventKind::Access(notify::event::AccessKind::Any);
        assert_eq!(FileChange::from_event(&kind, PathBuf::from("/a")), None);
    }

    #[test]
    fn test_burst_collapses_to_last_event() {
        let start = Instant::now();
        let mut pending = PendingChanges::new(WINDOW);
        let path = PathBuf::from("/site/app.js");

        pending.push(FileChange::Created(path.clone()), start);
        pending.push(FileChange::Modified(path.clone()), start + Duration::from_millis(20));
        pending.push(FileChange::Modified(path.clone()), start + Duration::from_millis(40));

        assert_eq!(pending.len(), 1);
        assert!(pending.take_due(start + Duration::from_millis(60)).is_empty());
        assert_eq!(
            pending.take_due(start + Duration::from_millis(90)),
            vec![FileChange::Modified(path)]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_paths_debounce_independently() {
        let start = Instant::now();
        let mut pending = PendingChanges::new(WINDOW);

        pending.push(FileChange::Modified(PathBuf::from("/b")), start);
        pending.push(FileChange::Modified(PathBuf::from("/a")), start);
        pending.push(FileChange::Removed(PathBuf::from("/c")), start + Duration::from_millis(30));

        assert_eq!(pending.next_deadline(), Some(start + WINDOW));
        let due = pending.take_due(start + WINDOW);
        assert_eq!(
            due,
            vec![
                FileChange::Modified(PathBuf::from("/a")),
                FileChange::Modified(PathBuf::from("/b")),
            ]
        );
        assert_eq!(pending.next_deadline(), Some(start + Duration::from_millis(80)));
    }

    #[test]
    fn test_watch_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = FileWatcher::new(temp.path().join("missing"));
        assert!(matches!(result, Err(CliError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_watcher_reports_writes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let (_watcher, mut rx) = match FileWatcher::new(root.clone()) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Skipping test_watcher_reports_writes: {}", e);
                return;
            }
        };

        let file = root.join("index.html");
        std::fs::write(&file, "<html></html>").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change in time")
            .expect("watcher alive");
        assert_eq!(change.path(), file.as_path());
    }
}
