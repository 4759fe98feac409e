//! C6 — layer manager: owns source list, scanned file records, and named
//! layers; drives `resolve`/`list` across the whole virtual tree (spec.md §4.6).

use crate::error::{StrataError, StrataResult};
use crate::layers::Layer;
use crate::scanner::{self, SourceEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct LayerManager {
    sources: Vec<SourceEntry>,
    files: Arc<Vec<scanner::FileRecord>>,
    layers: BTreeMap<String, Layer>,
}

impl LayerManager {
    pub fn new() -> Self {
        Self { sources: Vec::new(), files: Arc::new(Vec::new()), layers: BTreeMap::new() }
    }

    pub fn add_source(&mut self, root: PathBuf, priority: i64, read_only: bool) -> StrataResult<()> {
        let meta = std::fs::metadata(&root)
            .map_err(|_| StrataError::NotFound(root.display().to_string()))?;
        if !meta.is_dir() {
            return Err(StrataError::NotDirectory(root.display().to_string()));
        }
        self.sources.push(SourceEntry { root, priority, read_only });
        Ok(())
    }

    pub fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }

    pub fn files(&self) -> &Arc<Vec<scanner::FileRecord>> {
        &self.files
    }

    pub fn add_layer(&mut self, layer: Layer) -> StrataResult<()> {
        let name = layer.name().to_string();
        if self.layers.contains_key(&name) {
            return Err(StrataError::Exists(name));
        }
        self.layers.insert(name, layer);
        Ok(())
    }

    pub fn remove_layer(&mut self, name: &str) -> StrataResult<()> {
        self.layers.remove(name).map(|_| ()).ok_or_else(|| StrataError::NotFound(name.to_string()))
    }

    pub fn get_layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn list_layers(&self) -> Vec<&str> {
        self.layers.keys().map(String::as_str).collect()
    }

    /// Replaces the file list by walking every configured source (C4).
    pub fn scan(&mut self) {
        let records = scanner::scan(&self.sources);
        self.files = Arc::new(records);
    }

    /// (Re)builds every layer's index from the current file snapshot.
    pub fn rebuild_indexes(&mut self) {
        for layer in self.layers.values_mut() {
            layer.build_index(Arc::clone(&self.files));
        }
    }

    /// Splits on the first `/`; an empty string or a bare layer name with no
    /// remainder returns absent, otherwise dispatches to the named layer.
    pub fn resolve(&self, virtual_path: &str) -> Option<PathBuf> {
        let trimmed = virtual_path.trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let (layer_name, rest) = match trimmed.split_once('/') {
            Some((name, rest)) => (name, rest),
            None => return None,
        };
        self.layers.get(layer_name)?.resolve(rest)
    }

    /// Empty string returns sorted layer names; bare layer name returns its
    /// top-level listing; deeper paths dispatch to the named layer.
    pub fn list(&self, virtual_path: &str) -> Vec<String> {
        let trimmed = virtual_path.trim_start_matches('/');
        if trimmed.is_empty() {
            return self.layers.keys().cloned().collect();
        }
        let (layer_name, rest) = match trimmed.split_once('/') {
            Some((name, rest)) => (name, rest),
            None => (trimmed, ""),
        };
        match self.layers.get(layer_name) {
            Some(layer) => layer.list(rest),
            None => Vec::new(),
        }
    }

    /// Probes each configured source root in priority order for a direct,
    /// non-virtual-layer backing path (spec.md §4.8 step 3).
    pub fn resolve_direct(&self, virtual_path: &str) -> Option<PathBuf> {
        let trimmed = virtual_path.trim_start_matches('/');
        let mut ordered: Vec<&SourceEntry> = self.sources.iter().collect();
        ordered.sort_by_key(|s| s.priority);
        for source in ordered {
            let candidate = if trimmed.is_empty() { source.root.clone() } else { source.root.join(trimmed) };
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn source_read_only(&self, backing: &Path) -> bool {
        self.sources.iter().any(|s| backing.starts_with(&s.root) && s.read_only)
    }

    /// Backing path a new file/directory at `virtual_path` would be created
    /// under: the highest-priority writable source root, joined with the
    /// path (spec.md §4.8's `make-directory`/`create` ops have nowhere else
    /// to land, since virtual layers are read-through projections).
    pub fn create_target(&self, virtual_path: &str) -> Option<PathBuf> {
        let trimmed = virtual_path.trim_start_matches('/');
        let mut ordered: Vec<&SourceEntry> = self.sources.iter().filter(|s| !s.read_only).collect();
        ordered.sort_by_key(|s| s.priority);
        ordered.first().map(|s| s.root.join(trimmed))
    }
}

impl Default for LayerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ClassifierLayer, ClassifyFn};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn add_source_rejects_missing_directory() {
        let mut mgr = LayerManager::new();
        let err = mgr.add_source(PathBuf::from("/no/such/dir"), 0, false).unwrap_err();
        assert!(matches!(err, StrataError::NotFound(_)));
    }

    #[test]
    fn add_layer_rejects_duplicate_name() {
        let mut mgr = LayerManager::new();
        mgr.add_layer(Layer::Classifier(ClassifierLayer::new("by-type", ClassifyFn::Extension))).unwrap();
        let err = mgr.add_layer(Layer::Classifier(ClassifierLayer::new("by-type", ClassifyFn::Extension))).unwrap_err();
        assert!(matches!(err, StrataError::Exists(_)));
    }

    #[test]
    fn scan_then_resolve_through_named_layer() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), b"1").unwrap();

        let mut mgr = LayerManager::new();
        mgr.add_source(dir.path().to_path_buf(), 0, false).unwrap();
        mgr.add_layer(Layer::Classifier(ClassifierLayer::new("by-type", ClassifyFn::Extension))).unwrap();
        mgr.scan();
        mgr.rebuild_indexes();

        assert_eq!(mgr.list(""), vec!["by-type".to_string()]);
        assert_eq!(mgr.list("by-type"), vec!["py".to_string()]);
        assert_eq!(mgr.resolve("by-type/py/a.py"), Some(dir.path().join("a.py")));
    }

    #[test]
    fn resolve_on_unknown_layer_or_bare_name_is_absent() {
        let mgr = LayerManager::new();
        assert!(mgr.resolve("").is_none());
        assert!(mgr.resolve("nope").is_none());
        assert!(mgr.resolve("nope/x").is_none());
    }

    #[test]
    fn resolve_direct_probes_sources_in_priority_order() {
        let low = tempdir().unwrap();
        let high = tempdir().unwrap();
        fs::write(high.path().join("only-in-high.txt"), b"x").unwrap();

        let mut mgr = LayerManager::new();
        mgr.add_source(low.path().to_path_buf(), 10, false).unwrap();
        mgr.add_source(high.path().to_path_buf(), 0, false).unwrap();

        let found = mgr.resolve_direct("only-in-high.txt").unwrap();
        assert_eq!(found, high.path().join("only-in-high.txt"));
    }
}
