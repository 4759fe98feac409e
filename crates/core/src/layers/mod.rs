//! C5 — virtual layers: per-layer index build, path resolution, and
//! directory listing (spec.md §4.5).
//!
//! Layers are modeled as a closed sum type (spec.md §9 design note) rather
//! than `dyn Trait` objects: the variant set below is exactly the four kinds
//! spec.md §4.5 names, dispatched by tag.

pub mod classifier;
pub mod date;
pub mod hierarchical;
pub mod tag;

use crate::scanner::FileRecord;
use std::path::PathBuf;
use std::sync::Arc;

pub use classifier::{ClassifierLayer, ClassifyFn};
pub use date::{DateLayer, TimestampField};
pub use hierarchical::HierarchicalLayer;
pub use tag::{TagExtractor, TagLayer};

/// A stable index into the file snapshot a layer's index was built from
/// (spec.md §9 design note: layers store `FileId`s, not back-references).
pub type FileId = usize;

/// One named organizational projection (spec.md §3's `Layer`).
pub enum Layer {
    Classifier(ClassifierLayer),
    Date(DateLayer),
    Tag(TagLayer),
    Hierarchical(HierarchicalLayer),
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Layer::Classifier(l) => &l.name,
            Layer::Date(l) => &l.name,
            Layer::Tag(l) => &l.name,
            Layer::Hierarchical(l) => &l.name,
        }
    }

    /// Consumes a snapshot of scanned files and (re)populates the layer's
    /// index. Idempotent: a later call replaces any prior index.
    pub fn build_index(&mut self, files: Arc<Vec<FileRecord>>) {
        match self {
            Layer::Classifier(l) => l.build_index(files),
            Layer::Date(l) => l.build_index(files),
            Layer::Tag(l) => l.build_index(files),
            Layer::Hierarchical(l) => l.build_index(files),
        }
    }

    pub fn resolve(&self, sub_path: &str) -> Option<PathBuf> {
        match self {
            Layer::Classifier(l) => l.resolve(sub_path),
            Layer::Date(l) => l.resolve(sub_path),
            Layer::Tag(l) => l.resolve(sub_path),
            Layer::Hierarchical(l) => l.resolve(sub_path),
        }
    }

    pub fn list(&self, sub_path: &str) -> Vec<String> {
        match self {
            Layer::Classifier(l) => l.list(sub_path),
            Layer::Date(l) => l.list(sub_path),
            Layer::Tag(l) => l.list(sub_path),
            Layer::Hierarchical(l) => l.list(sub_path),
        }
    }
}

/// Splits a virtual sub-path into non-empty components.
pub(crate) fn split_components(sub_path: &str) -> Vec<&str> {
    sub_path.split('/').filter(|s| !s.is_empty()).collect()
}
