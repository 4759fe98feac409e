//! C4 — source scanner: walks configured source trees and produces immutable
//! file metadata records (spec.md §4.4).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A configured source tree (spec.md §3's `SourceEntry`). Lifetime = process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub root: PathBuf,
    /// Lower value = higher precedence.
    pub priority: i64,
    pub read_only: bool,
}

/// Seconds + nanoseconds, matching the data model's timestamp granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / 1_000_000_000.0
    }

    #[cfg(unix)]
    fn from_system_time(t: std::time::SystemTime) -> Self {
        match t.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timestamp { secs: d.as_secs() as i64, nanos: d.subsec_nanos() },
            Err(e) => {
                let d = e.duration();
                Timestamp { secs: -(d.as_secs() as i64), nanos: d.subsec_nanos() }
            }
        }
    }
}

/// Immutable file metadata record, produced by C4 and owned exclusively by
/// the layer manager (spec.md §3's `FileRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub rel_path: PathBuf,
    pub abs_path: PathBuf,
    pub extension: Option<String>,
    pub size: u64,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub atime: Timestamp,
    pub mode: u32,
    pub source_priority: i64,
}

impl FileRecord {
    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }
}

/// Walks one source root and produces records for every regular file (and
/// symlink-to-file) beneath it. Files that cannot be stat'd are silently
/// skipped; symlinked directories are never descended into.
fn scan_source(source: &SourceEntry) -> Vec<FileRecord> {
    let mut out = Vec::new();
    let walker = ignore::WalkBuilder::new(&source.root)
        .standard_filters(false)
        .follow_links(false)
        .hidden(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                trace!(error = %e, "skipping unreadable directory entry during scan");
                continue;
            }
        };

        let path = entry.path();
        if path == source.root {
            continue;
        }

        let file_type = match entry.file_type() {
            Some(ft) => ft,
            None => continue,
        };

        if file_type.is_dir() {
            continue;
        }

        let is_symlink = file_type.is_symlink();
        // Follow the symlink only to classify its target; never to traverse.
        let metadata = if is_symlink { std::fs::metadata(path) } else { entry.metadata().map_err(std::io::Error::from) };
        let metadata = match metadata {
            Ok(m) => m,
            Err(e) => {
                trace!(path = %path.display(), error = %e, "skipping unstattable entry");
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        match build_record(&source.root, path, &metadata, is_symlink, source.priority) {
            Some(record) => out.push(record),
            None => trace!(path = %path.display(), "skipping entry outside its source root"),
        }
    }

    out
}

#[cfg(unix)]
fn build_record(
    root: &Path,
    path: &Path,
    metadata: &std::fs::Metadata,
    is_symlink: bool,
    source_priority: i64,
) -> Option<FileRecord> {
    use std::os::unix::fs::MetadataExt;

    let rel_path = path.strip_prefix(root).ok()?.to_path_buf();
    let name = path.file_name()?.to_string_lossy().to_string();
    let extension = path.extension().map(|e| e.to_string_lossy().to_lowercase());

    let mut mode = metadata.mode();
    if is_symlink {
        mode = (mode & !libc::S_IFMT) | libc::S_IFLNK;
    }

    Some(FileRecord {
        name,
        rel_path,
        abs_path: path.to_path_buf(),
        extension,
        size: metadata.size(),
        mtime: Timestamp::from_system_time(metadata.modified().unwrap_or(std::time::UNIX_EPOCH)),
        ctime: Timestamp { secs: metadata.ctime(), nanos: metadata.ctime_nsec() as u32 },
        atime: Timestamp::from_system_time(metadata.accessed().unwrap_or(std::time::UNIX_EPOCH)),
        mode,
        source_priority,
    })
}

/// One-shot scan over every configured source (spec.md §4.4); owned by the
/// layer manager and re-run on demand.
pub fn scan(sources: &[SourceEntry]) -> Vec<FileRecord> {
    debug!(sources = sources.len(), "starting source scan");
    let records: Vec<FileRecord> = sources.par_iter().flat_map(scan_source).collect();
    debug!(files = records.len(), "scan complete");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_regular_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), b"1").unwrap();
        fs::write(dir.path().join("b.py"), b"2").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.md"), b"3").unwrap();

        let source = SourceEntry { root: dir.path().to_path_buf(), priority: 0, read_only: false };
        let records = scan(&[source]);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(records.len(), 3);
        assert!(names.contains(&"a.py"));
        assert!(names.contains(&"c.md"));
    }

    #[test]
    fn two_scans_are_identical_for_stable_trees() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), b"stable").unwrap();
        let source = SourceEntry { root: dir.path().to_path_buf(), priority: 0, read_only: false };

        let first = scan(&[source.clone()]);
        let second = scan(&[source]);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].rel_path, second[0].rel_path);
        assert_eq!(first[0].size, second[0].size);
    }

    #[test]
    fn symlink_to_file_is_recorded_with_bit_set() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real.txt");
        fs::write(&target, b"data").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();

        let source = SourceEntry { root: dir.path().to_path_buf(), priority: 0, read_only: false };
        let records = scan(&[source]);
        let link = records.iter().find(|r| r.name == "link.txt").expect("link recorded");
        assert!(link.is_symlink());
    }

    #[test]
    fn directories_are_never_recorded() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let source = SourceEntry { root: dir.path().to_path_buf(), priority: 0, read_only: false };
        let records = scan(&[source]);
        assert!(records.is_empty());
    }
}
