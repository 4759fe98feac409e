//! Tag virtual layer (spec.md §4.5.3): zero-or-more tags per file via one or
//! more extractors.

use super::{split_components, FileId};
use crate::error::{StrataError, StrataResult};
use crate::pattern::PatternMatcher;
use crate::scanner::FileRecord;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// A closed set of builtin tag extractors (spec.md §9 design note).
pub enum TagExtractor {
    /// Extended attribute holding a comma-separated tag list.
    Xattr(String),
    /// Sidecar file `F<suffix>`: JSON array of strings, or comma-separated.
    Sidecar(String),
    /// `(tag, glob pattern)` pairs tested against the file name; every match contributes.
    FilenamePattern(Vec<(String, String)>),
    /// `(tag, glob pattern)` pairs tested against the relative path.
    PathPattern(Vec<(String, String)>),
    /// `(tag, extensions)` groups; a file's extension membership contributes the tag.
    ExtensionGroup(Vec<(String, Vec<String>)>),
}

impl TagExtractor {
    fn extract(&self, record: &FileRecord) -> StrataResult<Vec<String>> {
        match self {
            TagExtractor::Xattr(key) => Ok(read_xattr_tags(&record.abs_path, key)),
            TagExtractor::Sidecar(suffix) => read_sidecar_tags(&record.abs_path, suffix),
            TagExtractor::FilenamePattern(pairs) => {
                Ok(matching_tags(pairs, &record.name))
            }
            TagExtractor::PathPattern(pairs) => {
                Ok(matching_tags(pairs, &record.rel_path.to_string_lossy()))
            }
            TagExtractor::ExtensionGroup(groups) => {
                let ext = record.extension.as_deref().unwrap_or("");
                Ok(groups
                    .iter()
                    .filter(|(_, exts)| exts.iter().any(|e| e == ext))
                    .map(|(tag, _)| tag.clone())
                    .collect())
            }
        }
    }
}

fn matching_tags(pairs: &[(String, String)], candidate: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (tag, pattern) in pairs {
        let mut matcher = PatternMatcher::new(false);
        if matcher.add_glob(pattern).is_ok() && matcher.matches(candidate) {
            out.push(tag.clone());
        }
    }
    out
}

#[cfg(unix)]
fn read_xattr_tags(path: &std::path::Path, key: &str) -> Vec<String> {
    use std::ffi::CString;
    let Ok(c_path) = CString::new(path.as_os_str().to_string_lossy().as_bytes()) else {
        return Vec::new();
    };
    let Ok(c_key) = CString::new(key) else {
        return Vec::new();
    };
    let mut buf = vec![0u8; 4096];
    let n = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            c_key.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        return Vec::new();
    }
    buf.truncate(n as usize);
    let raw = String::from_utf8_lossy(&buf);
    split_csv(&raw)
}

#[cfg(not(unix))]
fn read_xattr_tags(_path: &std::path::Path, _key: &str) -> Vec<String> {
    Vec::new()
}

fn read_sidecar_tags(path: &std::path::Path, suffix: &str) -> StrataResult<Vec<String>> {
    let sidecar = {
        let mut os = path.as_os_str().to_os_string();
        os.push(suffix);
        PathBuf::from(os)
    };
    match std::fs::read_to_string(&sidecar) {
        Ok(content) => Ok(parse_sidecar_content(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StrataError::from(e)),
    }
}

fn parse_sidecar_content(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    split_csv(trimmed)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

pub struct TagLayer {
    pub name: String,
    extractors: Vec<TagExtractor>,
    index: BTreeMap<String, Vec<FileId>>,
    files: Arc<Vec<FileRecord>>,
}

impl TagLayer {
    pub fn new(name: impl Into<String>, extractors: Vec<TagExtractor>) -> Self {
        Self { name: name.into(), extractors, index: BTreeMap::new(), files: Arc::new(Vec::new()) }
    }

    pub fn build_index(&mut self, files: Arc<Vec<FileRecord>>) {
        let mut index: BTreeMap<String, HashSet<FileId>> = BTreeMap::new();
        'file: for (id, record) in files.iter().enumerate() {
            let mut tags: HashSet<String> = HashSet::new();
            for extractor in &self.extractors {
                match extractor.extract(record) {
                    Ok(found) => tags.extend(found.into_iter().filter(|t| !t.is_empty())),
                    Err(_) => continue 'file,
                }
            }
            for tag in tags {
                index.entry(tag).or_default().insert(id);
            }
        }
        self.index = index
            .into_iter()
            .map(|(tag, ids)| {
                let mut ids: Vec<FileId> = ids.into_iter().collect();
                ids.sort_by_key(|&id| files[id].name.clone());
                (tag, ids)
            })
            .collect();
        self.files = files;
    }

    pub fn resolve(&self, sub_path: &str) -> Option<PathBuf> {
        let parts = split_components(sub_path);
        if parts.len() != 2 {
            return None;
        }
        let (tag, name) = (parts[0], parts[1]);
        let ids = self.index.get(tag)?;
        ids.iter().map(|&id| &self.files[id]).find(|r| r.name == name).map(|r| r.abs_path.clone())
    }

    pub fn list(&self, sub_path: &str) -> Vec<String> {
        let parts = split_components(sub_path);
        if parts.is_empty() {
            let mut tags: Vec<String> = self.index.keys().cloned().collect();
            tags.sort();
            return tags;
        }
        if parts.len() == 1 {
            return match self.index.get(parts[0]) {
                Some(ids) => {
                    let mut names: Vec<String> = ids.iter().map(|&id| self.files[id].name.clone()).collect();
                    names.sort();
                    names
                }
                None => Vec::new(),
            };
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Timestamp;
    use std::fs;
    use tempfile::tempdir;

    fn rec(path: std::path::PathBuf) -> FileRecord {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        FileRecord {
            name,
            rel_path: PathBuf::from(path.file_name().unwrap()),
            abs_path: path,
            extension: None,
            size: 1,
            mtime: Timestamp { secs: 0, nanos: 0 },
            ctime: Timestamp { secs: 0, nanos: 0 },
            atime: Timestamp { secs: 0, nanos: 0 },
            mode: 0o100644,
            source_priority: 0,
        }
    }

    #[test]
    fn sidecar_json_array_tags() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("photo.jpg");
        fs::write(&target, b"x").unwrap();
        fs::write(dir.path().join("photo.jpg.tags"), br#"["vacation", "family"]"#).unwrap();

        let mut layer = TagLayer::new("by-tag", vec![TagExtractor::Sidecar(".tags".to_string())]);
        layer.build_index(Arc::new(vec![rec(target)]));

        let mut tags = layer.list("");
        tags.sort();
        assert_eq!(tags, vec!["family".to_string(), "vacation".to_string()]);
    }

    #[test]
    fn sidecar_csv_tags() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        fs::write(&target, b"x").unwrap();
        fs::write(dir.path().join("doc.txt.tags"), b" work, draft ,").unwrap();

        let mut layer = TagLayer::new("by-tag", vec![TagExtractor::Sidecar(".tags".to_string())]);
        layer.build_index(Arc::new(vec![rec(target)]));
        let mut tags = layer.list("");
        tags.sort();
        assert_eq!(tags, vec!["draft".to_string(), "work".to_string()]);
    }

    #[test]
    fn missing_sidecar_yields_no_tags_not_an_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("lonely.txt");
        fs::write(&target, b"x").unwrap();

        let mut layer = TagLayer::new("by-tag", vec![TagExtractor::Sidecar(".tags".to_string())]);
        layer.build_index(Arc::new(vec![rec(target)]));
        assert!(layer.list("").is_empty());
    }
}
