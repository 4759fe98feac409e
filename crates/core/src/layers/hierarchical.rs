//! Hierarchical virtual layer (spec.md §4.5.4): nests files under an ordered
//! chain of classify functions, one directory level per function.

use super::{split_components, ClassifyFn, FileId};
use crate::scanner::FileRecord;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Leaf marker under which a level's matching files are listed, distinct
/// from any real category name a [`ClassifyFn`] could produce.
const LEAF: &str = "\u{0}files";

enum Node {
    Branch(BTreeMap<String, Node>),
    Leaf(Vec<FileId>),
}

impl Node {
    fn branch() -> Self {
        Node::Branch(BTreeMap::new())
    }
}

pub struct HierarchicalLayer {
    pub name: String,
    levels: Vec<ClassifyFn>,
    root: Node,
    files: Arc<Vec<FileRecord>>,
}

impl HierarchicalLayer {
    /// `levels` must be non-empty (spec.md §4.5.4); an empty chain collapses
    /// the layer to nothing and is rejected by the caller building it.
    pub fn new(name: impl Into<String>, levels: Vec<ClassifyFn>) -> Self {
        Self { name: name.into(), levels, root: Node::branch(), files: Arc::new(Vec::new()) }
    }

    pub fn build_index(&mut self, files: Arc<Vec<FileRecord>>) {
        let mut root = Node::branch();
        'file: for (id, record) in files.iter().enumerate() {
            let mut categories = Vec::with_capacity(self.levels.len());
            for level in &self.levels {
                match level.classify(record) {
                    Some(c) if !c.is_empty() => categories.push(c),
                    _ => continue 'file,
                }
            }
            insert_path(&mut root, &categories, id);
        }
        sort_leaves(&mut root, &files);
        self.root = root;
        self.files = files;
    }

    pub fn resolve(&self, sub_path: &str) -> Option<PathBuf> {
        let parts = split_components(sub_path);
        if parts.len() != self.levels.len() + 1 {
            return None;
        }
        let (categories, name) = parts.split_at(parts.len() - 1);
        let name = name[0];
        let Node::Branch(children) = descend(&self.root, categories)? else { return None };
        let Some(Node::Leaf(ids)) = children.get(LEAF) else { return None };
        ids.iter().map(|&id| &self.files[id]).find(|r| r.name == name).map(|r| r.abs_path.clone())
    }

    pub fn list(&self, sub_path: &str) -> Vec<String> {
        let parts = split_components(sub_path);
        if parts.len() > self.levels.len() {
            return Vec::new();
        }
        let Some(Node::Branch(children)) = descend(&self.root, &parts) else { return Vec::new() };
        if parts.len() == self.levels.len() {
            return match children.get(LEAF) {
                Some(Node::Leaf(ids)) => {
                    let mut names: Vec<String> = ids.iter().map(|&id| self.files[id].name.clone()).collect();
                    names.sort();
                    names
                }
                _ => Vec::new(),
            };
        }
        let mut names: Vec<String> = children.keys().filter(|k| k.as_str() != LEAF).cloned().collect();
        names.sort();
        names
    }
}

fn insert_path(root: &mut Node, categories: &[String], id: FileId) {
    let mut node = root;
    for category in categories {
        let Node::Branch(children) = node else { unreachable!("intermediate nodes are always branches") };
        node = children.entry(category.clone()).or_insert_with(Node::branch);
    }
    let Node::Branch(children) = node else { unreachable!() };
    match children.entry(LEAF.to_string()).or_insert_with(|| Node::Leaf(Vec::new())) {
        Node::Leaf(ids) => ids.push(id),
        Node::Branch(_) => unreachable!("leaf slot never holds a branch"),
    }
}

fn descend<'a>(node: &'a Node, parts: &[&str]) -> Option<&'a Node> {
    let mut current = node;
    for part in parts {
        match current {
            Node::Branch(children) => current = children.get(*part)?,
            Node::Leaf(_) => return None,
        }
    }
    Some(current)
}

fn sort_leaves(node: &mut Node, files: &[FileRecord]) {
    match node {
        Node::Leaf(ids) => ids.sort_by_key(|&id| files[id].name.clone()),
        Node::Branch(children) => {
            for child in children.values_mut() {
                sort_leaves(child, files);
            }
        }
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
    fn two_level_nesting_by_mime_then_extension() {
        let mut layer = HierarchicalLayer::new("by-kind", vec![ClassifyFn::MimeMajor, ClassifyFn::Extension]);
        layer.build_index(Arc::new(vec![
            rec("a.txt", Some("txt"), 10),
            rec("b.md", Some("md"), 10),
            rec("c.png", Some("png"), 10),
        ]));

        let top = layer.list("");
        assert!(top.contains(&"text".to_string()));
        assert!(top.contains(&"image".to_string()));

        let text_exts = layer.list("text");
        assert!(text_exts.contains(&"txt".to_string()));
        assert!(text_exts.contains(&"md".to_string()));

        assert_eq!(layer.resolve("text/txt/a.txt"), Some(PathBuf::from("/src/a.txt")));
        assert!(layer.resolve("text/txt/b.md").is_none());
    }

    #[test]
    fn wrong_depth_resolve_returns_none() {
        let mut layer = HierarchicalLayer::new("by-kind", vec![ClassifyFn::MimeMajor, ClassifyFn::Extension]);
        layer.build_index(Arc::new(vec![rec("a.txt", Some("txt"), 10)]));
        assert!(layer.resolve("text/a.txt").is_none());
        assert!(layer.resolve("text").is_none());
    }

    #[test]
    fn leaf_marker_never_surfaces_in_listings() {
        let mut layer = HierarchicalLayer::new("by-kind", vec![ClassifyFn::Extension]);
        layer.build_index(Arc::new(vec![rec("a.txt", Some("txt"), 10)]));
        let names = layer.list("txt");
        assert_eq!(names, vec!["a.txt".to_string()]);
    }
}
