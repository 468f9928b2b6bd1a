//! In-memory mock filesystem for testing `/proc` readers.
//!
//! Clones share the same underlying state, so a test can hand one clone to a
//! running source and keep mutating `/proc` through another (a process
//! changing its counters, or disappearing).

use super::FileSystem;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockTree {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockTree {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<MockTree>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file. Parent directories are created implicitly.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write();
        tree.add_parents(&path);
        tree.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write();
        tree.add_parents(&path);
        tree.directories.insert(path);
    }

    /// Removes a file or a directory together with everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.write();
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }

    /// Adds a process with its `/proc/[pid]/stat` and `/proc/[pid]/status`
    /// files under `proc_root`.
    pub fn add_process(&self, proc_root: &str, pid: u32, stat: &str, status: &str) {
        let base = PathBuf::from(format!("{}/{}", proc_root, pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
    }

    /// Adds a minimal system view: `loadavg`, `meminfo` and `stat`.
    pub fn add_system(&self, proc_root: &str, loadavg: &str, meminfo: &str, stat: &str) {
        self.add_file(format!("{}/loadavg", proc_root), loadavg);
        self.add_file(format!("{}/meminfo", proc_root), meminfo);
        self.add_file(format!("{}/stat", proc_root), stat);
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.tree.read().files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.read();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }
}

/// A `/proc/[pid]/stat` line with the given state and CPU/memory counters.
///
/// Used by tests that need a syntactically complete stat record.
pub fn stat_line(
    pid: u32,
    comm: &str,
    state: char,
    utime: u64,
    stime: u64,
    vsize: u64,
    rss_pages: u64,
) -> String {
    format!(
        "{pid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 3 0 12345 {vsize} {rss_pages} 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 16384 kB\n");

        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc")));

        let content = fs.read_to_string(Path::new("/proc/meminfo")).unwrap();
        assert_eq!(content, "MemTotal: 16384 kB\n");
    }

    #[test]
    fn test_mock_fs_clones_share_state() {
        let fs = MockFs::new();
        let view = fs.clone();
        fs.add_process("/proc", 42, &stat_line(42, "sleep", 'S', 1, 1, 4096, 1), "Name:\tsleep\n");
        assert!(view.exists(Path::new("/proc/42/stat")));

        fs.remove("/proc/42");
        assert!(!view.exists(Path::new("/proc/42")));
        assert!(!view.exists(Path::new("/proc/42/stat")));
        assert!(view.exists(Path::new("/proc")));
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
