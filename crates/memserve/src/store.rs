//! In-memory file store.
//!
//! Holds every file the build emits, keyed by absolute virtual path, plus the
//! per-path change records used for incremental-build feedback. Nothing here
//! ever touches the real filesystem.
//!
//! The map is guarded by a parking_lot `RwLock`: the producer is the only
//! writer, request handlers only read, and a single `write` call swaps the
//! whole byte buffer so readers never observe a partial file.

use crate::error::{Result, ServerError};
use crate::reload::ReloadChannel;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// A file held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Absolute, `/`-rooted virtual path
    pub path: String,
    /// Full contents of the last write
    pub bytes: Bytes,
    /// When the last write happened
    pub written_at: Timestamp,
}

/// Shared store handle.
pub type SharedStore = Arc<MemoryStore>;

/// Key-value map from virtual path to file bytes.
pub struct MemoryStore {
    /// Serving root every relative lookup is joined against
    root: String,

    files: RwLock<HashMap<String, VirtualFile>>,

    /// Change records: output path -> last write time. Never pruned.
    changes: RwLock<HashMap<String, Timestamp>>,

    /// Last issued timestamp, keeps `written_at` non-decreasing
    clock: AtomicU64,

    /// Reload channel notified after each successful write
    reload: Option<ReloadChannel>,
}

impl MemoryStore {
    /// Create an empty store serving from `root`.
    ///
    /// A relative root is coerced to `/`-rooted (`dist` becomes `/dist`).
    pub fn new(root: &str) -> Self {
        Self {
            root: virtual_root(root),
            files: RwLock::new(HashMap::new()),
            changes: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            reload: None,
        }
    }

    /// Notify `channel` whenever a write lands.
    pub fn with_reload(mut self, channel: ReloadChannel) -> Self {
        self.reload = Some(channel);
        self
    }

    /// The serving root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Store `bytes` under `path`, joined against the serving root.
    ///
    /// # Errors
    ///
    /// `InvalidPath` if the path is empty, escapes `/`, names a directory,
    /// or would nest under an existing file.
    pub fn write(&self, path: &str, bytes: impl Into<Bytes>) -> Result<Timestamp> {
        let full = join(&self.root, path)?;
        self.write_absolute(full, bytes.into())
    }

    /// Store `bytes` at `relative` under an explicit output root.
    ///
    /// This is the producer-facing entry point: build tools emit files
    /// relative to their output directory, which need not be the serving
    /// root.
    pub fn write_output(
        &self,
        output_root: &str,
        relative: &str,
        bytes: impl Into<Bytes>,
    ) -> Result<Timestamp> {
        let full = join(&virtual_root(output_root), relative)?;
        self.write_absolute(full, bytes.into())
    }

    fn write_absolute(&self, path: String, bytes: Bytes) -> Result<Timestamp> {
        let written_at = self.tick();

        {
            let mut files = self.files.write();

            let dir_prefix = format!("{}/", path);
            if files.keys().any(|key| key.starts_with(&dir_prefix)) {
                return Err(ServerError::InvalidPath(path));
            }
            if ancestors(&path).any(|ancestor| files.contains_key(ancestor)) {
                return Err(ServerError::InvalidPath(path));
            }

            files.insert(
                path.clone(),
                VirtualFile {
                    path: path.clone(),
                    bytes,
                    written_at,
                },
            );
        }

        tracing::debug!(path = %path, written_at, "stored file");
        self.changes.write().insert(path, written_at);

        if let Some(reload) = &self.reload {
            reload.notify_reload();
        }

        Ok(written_at)
    }

    /// Drop the file at `path` (joined against the serving root).
    ///
    /// The change record is kept. Returns whether a file was removed.
    pub fn remove(&self, path: &str) -> bool {
        let Ok(full) = join(&self.root, path) else {
            return false;
        };
        self.remove_absolute(&full)
    }

    /// Drop the file at `relative` under an explicit output root.
    pub fn remove_output(&self, output_root: &str, relative: &str) -> bool {
        let Ok(full) = join(&virtual_root(output_root), relative) else {
            return false;
        };
        self.remove_absolute(&full)
    }

    /// Drop the file at `relative` and every file below it, under an
    /// explicit output root.
    ///
    /// Reload is notified once for the whole batch. Returns how many files
    /// were removed.
    pub fn remove_tree_output(&self, output_root: &str, relative: &str) -> usize {
        let Ok(full) = join(&virtual_root(output_root), relative) else {
            return 0;
        };
        let dir_prefix = format!("{}/", full);

        let removed = {
            let mut files = self.files.write();
            let before = files.len();
            files.retain(|key, _| *key != full && !key.starts_with(&dir_prefix));
            before - files.len()
        };

        if removed > 0 {
            tracing::debug!(path = %full, removed, "removed tree");
            if let Some(reload) = &self.reload {
                reload.notify_reload();
            }
        }
        removed
    }

    fn remove_absolute(&self, path: &str) -> bool {
        let removed = self.files.write().remove(path).is_some();
        if removed {
            tracing::debug!(path = %path, "removed file");
            if let Some(reload) = &self.reload {
                reload.notify_reload();
            }
        }
        removed
    }

    /// Read the bytes stored at `path`.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing is stored there.
    pub fn read(&self, path: &str) -> Result<Bytes> {
        self.file(path)
            .map(|file| file.bytes)
            .ok_or_else(|| ServerError::NotFound(path.to_string()))
    }

    /// Full entry for `path`, if stored.
    pub fn file(&self, path: &str) -> Option<VirtualFile> {
        let full = join(&self.root, path).ok()?;
        self.files.read().get(&full).cloned()
    }

    /// Whether a file is stored at `path`.
    pub fn exists(&self, path: &str) -> bool {
        match join(&self.root, path) {
            Ok(full) => self.files.read().contains_key(&full),
            Err(_) => false,
        }
    }

    /// Whether `path` is an implicit directory (some file lives beneath it).
    pub fn is_dir(&self, path: &str) -> bool {
        let prefix = match join(&self.root, path) {
            Ok(full) => format!("{}/", full),
            Err(_) => format!("{}/", self.root.trim_end_matches('/')),
        };
        self.files.read().keys().any(|key| key.starts_with(&prefix))
    }

    /// Has `path` been written after `timestamp`?
    ///
    /// True when there is no change record yet.
    pub fn changed_since(&self, path: &str, timestamp: Timestamp) -> bool {
        let Ok(full) = join(&self.root, path) else {
            return true;
        };
        self.record_newer_than(&full, timestamp)
    }

    /// Does a source file modified at `source_mtime` need to be written
    /// again to `relative` under `output_root`?
    ///
    /// True when the output was never written or the source is newer than
    /// the last write.
    pub fn query_changed(&self, output_root: &str, relative: &str, source_mtime: Timestamp) -> bool {
        let Ok(full) = join(&virtual_root(output_root), relative) else {
            return true;
        };
        match self.changes.read().get(&full) {
            Some(written_at) => source_mtime > *written_at,
            None => true,
        }
    }

    fn record_newer_than(&self, full: &str, timestamp: Timestamp) -> bool {
        match self.changes.read().get(full) {
            Some(written_at) => *written_at > timestamp,
            None => true,
        }
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn tick(&self) -> Timestamp {
        let now = now_ms();
        let previous = self.clock.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("root", &self.root)
            .field("files", &self.len())
            .field("reload", &self.reload.is_some())
            .finish()
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Coerce a directory to a `/`-rooted virtual path.
pub fn virtual_root(dir: &str) -> String {
    let dir = dir.replace('\\', "/");
    let segments: Vec<&str> = dir
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Join `relative` onto `base`, normalising separators and dot segments.
pub(crate) fn join(base: &str, relative: &str) -> Result<String> {
    if relative.trim().is_empty() || relative.contains('\0') {
        return Err(ServerError::InvalidPath(relative.to_string()));
    }

    let relative = relative.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in base.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ServerError::InvalidPath(relative.clone()));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(ServerError::InvalidPath(relative));
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Strict ancestors of an absolute path, nearest first, excluding `/`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|idx| *idx > 0)
        .map(move |idx| &path[..idx])
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
}
