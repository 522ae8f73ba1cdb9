//! Copies a build directory on disk into the in-memory store.
//!
//! The initial scan only writes files whose modification time is newer than
//! their change record, so scanning twice is cheap. Watcher events always
//! write, since the event itself says the file changed. A watcher event for
//! a directory (a subtree moved in or out) covers every file below it.

use crate::error::{CliError, Result, ResultExt};
use memserve::{SharedStore, Timestamp};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

/// Outcome of one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub written: usize,
    pub unchanged: usize,
}

/// What syncing one path did to the store, with the number of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Written(usize),
    Removed(usize),
    Skipped,
}

pub struct Mirror {
    source: PathBuf,
    output_root: String,
    store: SharedStore,
}

impl Mirror {
    /// Mirror `source` into `store` under the virtual `output_root`.
    pub fn new(source: PathBuf, output_root: impl Into<String>, store: SharedStore) -> Self {
        Self {
            source,
            output_root: output_root.into(),
            store,
        }
    }

    /// `/`-separated path of `path` below the source directory.
    ///
    /// `None` for paths outside the source and for hidden entries.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.source).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str()?;
                    if name.starts_with('.') {
                        return None;
                    }
                    parts.push(name);
                }
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Walk the source directory and write every changed file.
    pub fn scan(&self) -> Result<ScanStats> {
        if !self.source.is_dir() {
            return Err(CliError::FileNotFound(self.source.clone()));
        }

        let mut stats = ScanStats::default();
        for (entry, relative) in self.files_under(&self.source)? {
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_millis() as Timestamp)
                .unwrap_or(Timestamp::MAX);

            if !self.store.query_changed(&self.output_root, &relative, mtime) {
                stats.unchanged += 1;
                continue;
            }

            let bytes = std::fs::read(entry.path()).with_path(entry.path())?;
            self.store.write_output(&self.output_root, &relative, bytes)?;
            stats.written += 1;
        }

        tracing::debug!(written = stats.written, unchanged = stats.unchanged, "scanned source");
        Ok(stats)
    }

    /// Bring the store in line with `path` on disk.
    ///
    /// Existing files are written and directories written file by file.
    /// When `path` has vanished, everything stored at or below it is removed.
    pub async fn sync(&self, path: &Path) -> Result<SyncOutcome> {
        let Some(relative) = self.relative(path) else {
            return Ok(SyncOutcome::Skipped);
        };

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let bytes = tokio::fs::read(path).await.with_path(path)?;
                self.store.write_output(&self.output_root, &relative, bytes)?;
                Ok(SyncOutcome::Written(1))
            }
            Ok(meta) if meta.is_dir() => {
                let mut written = 0;
                for (entry, relative) in self.files_under(path)? {
                    let bytes = tokio::fs::read(entry.path()).await.with_path(entry.path())?;
                    self.store.write_output(&self.output_root, &relative, bytes)?;
                    written += 1;
                }
                Ok(if written > 0 {
                    SyncOutcome::Written(written)
                } else {
                    SyncOutcome::Skipped
                })
            }
            Ok(_) => Ok(SyncOutcome::Skipped),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match self.store.remove_tree_output(&self.output_root, &relative) {
                    0 => Ok(SyncOutcome::Skipped),
                    removed => Ok(SyncOutcome::Removed(removed)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Regular, non-hidden files below `root`, with their relative paths.
    fn files_under(&self, root: &Path) -> Result<Vec<(DirEntry, String)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| CliError::Custom(format!("Failed to walk source: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(relative) = self.relative(entry.path()) {
                files.push((entry, relative));
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memserve::MemoryStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn mirror_of(temp: &TempDir) -> (Mirror, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new("/dist"));
        let mirror = Mirror::new(temp.path().to_path_buf(), "/dist", Arc::clone(&store));
        (mirror, store)
    }

    #[test]
    fn test_relative_paths() {
        let temp = TempDir::new().unwrap();
        let (mirror, _) = mirror_of(&temp);

        assert_eq!(
            mirror.relative(&temp.path().join("assets").join("app.js")).as_deref(),
            Some("assets/app.js")
        );
        assert_eq!(mirror.relative(&temp.path().join(".DS_Store")), None);
        assert_eq!(mirror.relative(&temp.path().join(".cache").join("x")), None);
        assert_eq!(mirror.relative(Path::new("/elsewhere/file.js")), None);
        assert_eq!(mirror.relative(temp.path()), None);
    }

    #[test]
    fn test_scan_writes_tree() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("assets")).unwrap();
        fs::write(temp.path().join("index.html"), "<html></html>").unwrap();
        fs::write(temp.path().join("assets").join("app.js"), "go()").unwrap();
        fs::write(temp.path().join(".hidden"), "secret").unwrap();

        let (mirror, store) = mirror_of(&temp);
        let stats = mirror.scan().unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(store.read("index.html").unwrap(), "<html></html>");
        assert_eq!(store.read("assets/app.js").unwrap(), "go()");
        assert!(!store.exists(".hidden"));
    }

    #[test]
    fn test_second_scan_skips_unchanged() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.html"), "<html></html>").unwrap();

        let (mirror, _) = mirror_of(&temp);
        mirror.scan().unwrap();
        let stats = mirror.scan().unwrap();

        assert_eq!(stats, ScanStats { written: 0, unchanged: 1 });
    }

    #[test]
    fn test_scan_missing_source() {
        let temp = TempDir::new().unwrap();
        let store: SharedStore = Arc::new(MemoryStore::new("/dist"));
        let mirror = Mirror::new(temp.path().join("nope"), "/dist", store);
        assert!(matches!(mirror.scan(), Err(CliError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_sync_writes_and_removes() {
        let temp = TempDir::new().unwrap();
        let (mirror, store) = mirror_of(&temp);
        let file = temp.path().join("style.css");

        fs::write(&file, "body {}").unwrap();
        assert_eq!(mirror.sync(&file).await.unwrap(), SyncOutcome::Written(1));
        assert_eq!(store.read("style.css").unwrap(), "body {}");

        fs::write(&file, "main {}").unwrap();
        mirror.sync(&file).await.unwrap();
        assert_eq!(store.read("style.css").unwrap(), "main {}");

        fs::remove_file(&file).unwrap();
        assert_eq!(mirror.sync(&file).await.unwrap(), SyncOutcome::Removed(1));
        assert!(!store.exists("style.css"));

        assert_eq!(mirror.sync(&file).await.unwrap(), SyncOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_sync_directory_moved_in() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let staged = outside.path().join("assets");
        fs::create_dir_all(staged.join("img")).unwrap();
        fs::write(staged.join("app.js"), "go()").unwrap();
        fs::write(staged.join("img").join("logo.svg"), "<svg/>").unwrap();
        fs::write(staged.join(".swp"), "junk").unwrap();

        let (mirror, store) = mirror_of(&temp);
        let dir = temp.path().join("assets");
        fs::rename(&staged, &dir).unwrap();

        assert_eq!(mirror.sync(&dir).await.unwrap(), SyncOutcome::Written(2));
        assert_eq!(
            store.paths(),
            vec!["/dist/assets/app.js".to_string(), "/dist/assets/img/logo.svg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sync_directory_moved_out() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let dir = temp.path().join("assets");
        fs::create_dir_all(dir.join("img")).unwrap();
        fs::write(dir.join("app.js"), "go()").unwrap();
        fs::write(dir.join("img").join("logo.svg"), "<svg/>").unwrap();
        fs::write(temp.path().join("index.html"), "<html></html>").unwrap();

        let (mirror, store) = mirror_of(&temp);
        mirror.scan().unwrap();
        assert_eq!(store.len(), 3);

        fs::rename(&dir, outside.path().join("assets")).unwrap();

        assert_eq!(mirror.sync(&dir).await.unwrap(), SyncOutcome::Removed(2));
        assert_eq!(store.paths(), vec!["/dist/index.html".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_empty_directory_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (mirror, store) = mirror_of(&temp);
        let dir = temp.path().join("assets");
        fs::create_dir(&dir).unwrap();

        assert_eq!(mirror.sync(&dir).await.unwrap(), SyncOutcome::Skipped);
        assert!(store.is_empty());
    }
}
