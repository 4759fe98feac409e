//! Classifier virtual layer (spec.md §4.5.1): single category function
//! producing one bucket per file.

use super::{split_components, FileId};
use crate::pattern::PatternMatcher;
use crate::scanner::FileRecord;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A closed set of builtin classify functions (spec.md §9 design note), plus
/// a user-supplied pattern-list form.
pub enum ClassifyFn {
    /// File extension, lowercased; bare names classify as `no-extension`.
    Extension,
    /// Bucketed by size: empty / tiny / small / medium / large / huge.
    SizeBucket,
    /// MIME major type (`text`, `image`, `audio`, `video`, `application`, …)
    /// via a static extension table.
    MimeMajor,
    /// Ordered `(category, patterns)` pairs; first matching pattern wins,
    /// falling back to `other`.
    PatternList(Vec<(String, Vec<String>)>),
}

impl ClassifyFn {
    /// Returns the category for a record, or `None`/empty to skip it.
    pub fn classify(&self, record: &FileRecord) -> Option<String> {
        match self {
            ClassifyFn::Extension => Some(match &record.extension {
                Some(ext) if !ext.is_empty() => ext.clone(),
                _ => "no-extension".to_string(),
            }),
            ClassifyFn::SizeBucket => Some(size_bucket(record.size).to_string()),
            ClassifyFn::MimeMajor => Some(mime_major(record.extension.as_deref()).to_string()),
            ClassifyFn::PatternList(groups) => {
                for (category, patterns) in groups {
                    let mut matcher = PatternMatcher::new(false);
                    let mut any_compiled = false;
                    for p in patterns {
                        if matcher.add_glob(p).is_ok() {
                            any_compiled = true;
                        }
                    }
                    if any_compiled && matcher.matches(&record.rel_path.to_string_lossy()) {
                        return Some(category.clone());
                    }
                }
                Some("other".to_string())
            }
        }
    }
}

fn size_bucket(size: u64) -> &'static str {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const HUNDRED_MIB: u64 = 100 * MIB;
    const GIB: u64 = 1024 * MIB;

    if size == 0 {
        "empty"
    } else if size < KIB {
        "tiny"
    } else if size < MIB {
        "small"
    } else if size < HUNDRED_MIB {
        "medium"
    } else if size < GIB {
        "large"
    } else {
        "huge"
    }
}

fn mime_major(extension: Option<&str>) -> &'static str {
    match extension.unwrap_or("") {
        "txt" | "md" | "rst" | "csv" | "log" | "ini" | "cfg" | "conf" | "toml" | "yaml" | "yml" => "text",
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "svg" | "tiff" | "ico" => "image",
        "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => "audio",
        "mp4" | "mkv" | "mov" | "avi" | "webm" => "video",
        "json" | "xml" | "html" | "htm" | "js" | "css" => "text",
        "" => "application",
        _ => "application",
    }
}

pub struct ClassifierLayer {
    pub name: String,
    classify_fn: ClassifyFn,
    index: BTreeMap<String, Vec<FileId>>,
    files: Arc<Vec<FileRecord>>,
}

impl ClassifierLayer {
    pub fn new(name: impl Into<String>, classify_fn: ClassifyFn) -> Self {
        Self { name: name.into(), classify_fn, index: BTreeMap::new(), files: Arc::new(Vec::new()) }
    }

    pub fn build_index(&mut self, files: Arc<Vec<FileRecord>>) {
        let mut index: BTreeMap<String, Vec<FileId>> = BTreeMap::new();
        for (id, record) in files.iter().enumerate() {
            let category = match self.classify_fn.classify(record) {
                Some(c) if !c.is_empty() => c,
                _ => continue,
            };
            index.entry(category).or_default().push(id);
        }
        for ids in index.values_mut() {
            ids.sort_by_key(|&id| files[id].name.clone());
        }
        self.index = index;
        self.files = files;
    }

    pub fn resolve(&self, sub_path: &str) -> Option<PathBuf> {
        let parts = split_components(sub_path);
        if parts.len() != 2 {
            return None;
        }
        let (category, name) = (parts[0], parts[1]);
        let ids = self.index.get(category)?;
        ids.iter().map(|&id| &self.files[id]).find(|r| r.name == name).map(|r| r.abs_path.clone())
    }

    pub fn list(&self, sub_path: &str) -> Vec<String> {
        let parts = split_components(sub_path);
        if parts.is_empty() {
            let mut cats: Vec<String> = self.index.keys().cloned().collect();
            cats.sort();
            return cats;
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

    fn rec(name: &str, ext: Option<&str>, size: u64) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            rel_path: PathBuf::from(name),
            abs_path: PathBuf::from(format!("/src/{name}")),
            extension: ext.map(|e| e.to_string()),
            size,
            mtime: Timestamp { secs: 0, nanos: 0 },
            ctime: Timestamp { secs: 0, nanos: 0 },
            atime: Timestamp { secs: 0, nanos: 0 },
            mode: 0o100644,
            source_priority: 0,
        }
    }

    #[test]
    fn s1_classification_by_extension() {
        let mut layer = ClassifierLayer::new("by-type", ClassifyFn::Extension);
        layer.build_index(Arc::new(vec![
            rec("a.py", Some("py"), 10),
            rec("b.py", Some("py"), 10),
            rec("c.md", Some("md"), 10),
        ]));

        assert_eq!(layer.list(""), vec!["md".to_string(), "py".to_string()]);
        assert_eq!(layer.list("py"), vec!["a.py".to_string(), "b.py".to_string()]);
        assert_eq!(layer.resolve("md/c.md"), Some(PathBuf::from("/src/c.md")));
    }

    #[test]
    fn bare_names_classify_as_no_extension() {
        let mut layer = ClassifierLayer::new("by-type", ClassifyFn::Extension);
        layer.build_index(Arc::new(vec![rec("README", None, 5)]));
        assert_eq!(layer.list(""), vec!["no-extension".to_string()]);
    }

    #[test]
    fn size_buckets_are_ordered() {
        let mut layer = ClassifierLayer::new("by-size", ClassifyFn::SizeBucket);
        layer.build_index(Arc::new(vec![
            rec("a", None, 0),
            rec("b", None, 2048),
            rec("c", None, 200 * 1024 * 1024),
        ]));
        let cats = layer.list("");
        assert!(cats.contains(&"empty".to_string()));
        assert!(cats.contains(&"small".to_string()));
        assert!(cats.contains(&"large".to_string()));
    }
}
