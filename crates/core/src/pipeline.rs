//! C8 — transform pipeline: ordered transform application with content-hash
//! caching in the L3 tier (spec.md §4.7).

use crate::cache::{CacheValue, MultiCache, Namespace};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transform::Transform;

/// Per-transform outcome recorded in a pipeline result (spec.md §4.7 step 5).
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: String,
    pub applied: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub bytes: Arc<Vec<u8>>,
    pub success: bool,
    pub transforms_applied: usize,
    pub steps: Vec<StepRecord>,
    pub from_cache: bool,
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest)[..16].to_string()
}

fn fingerprint(transforms: &[Transform]) -> String {
    let mut hasher = Sha256::new();
    for t in transforms {
        hasher.update(t.name.as_bytes());
        hasher.update([t.enabled as u8]);
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

pub struct Pipeline {
    transforms: Mutex<Vec<Transform>>,
    cache: Arc<MultiCache>,
    caching_enabled: bool,
    halt_on_error: bool,
}

impl Pipeline {
    pub fn new(cache: Arc<MultiCache>, caching_enabled: bool, halt_on_error: bool) -> Self {
        Self { transforms: Mutex::new(Vec::new()), cache, caching_enabled, halt_on_error }
    }

    pub fn add_transform(&self, transform: Transform) {
        self.transforms.lock().push(transform);
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.lock().len()
    }

    /// Applies the pipeline's transforms over `bytes`, consulting and
    /// populating the transform cache keyed on `(fingerprint, path, content hash)`.
    ///
    /// The transform list is held under its lock only long enough to run the
    /// pipeline over it; a concurrent `add_transform` blocks until this
    /// `apply` returns rather than disturbing it mid-iteration.
    pub fn apply(&self, bytes: &[u8], virtual_path: &str, skip_cache: bool) -> PipelineResult {
        let guard = self.transforms.lock();
        if guard.is_empty() {
            return PipelineResult {
                bytes: Arc::new(bytes.to_vec()),
                success: true,
                transforms_applied: 0,
                steps: Vec::new(),
                from_cache: false,
            };
        }
        self.apply_locked(&guard, bytes, virtual_path, skip_cache)
    }

    fn apply_locked(
        &self,
        transforms: &[Transform],
        bytes: &[u8],
        virtual_path: &str,
        skip_cache: bool,
    ) -> PipelineResult {
        let fp = fingerprint(transforms);
        let hash = content_hash(bytes);
        let cache_key = format!("{fp}:{virtual_path}:{hash}");

        if self.caching_enabled && !skip_cache {
            if let Some(CacheValue::Bytes(cached)) = self.cache.get(Namespace::Transform, &cache_key) {
                return PipelineResult {
                    bytes: cached,
                    success: true,
                    transforms_applied: transforms.iter().filter(|t| t.enabled).count(),
                    steps: Vec::new(),
                    from_cache: true,
                };
            }
        }

        let mut current = bytes.to_vec();
        let mut steps = Vec::with_capacity(transforms.len());
        let mut applied = 0usize;
        let mut overall_success = true;

        for t in transforms {
            if !t.enabled || !t.matches_path(virtual_path) {
                continue;
            }
            let start = Instant::now();
            match t.apply(&current) {
                Ok(out) => {
                    current = out;
                    applied += 1;
                    steps.push(StepRecord {
                        name: t.name.clone(),
                        applied: true,
                        error: None,
                        duration: start.elapsed(),
                    });
                }
                Err(e) => {
                    overall_success = false;
                    steps.push(StepRecord {
                        name: t.name.clone(),
                        applied: false,
                        error: Some(e.to_string()),
                        duration: start.elapsed(),
                    });
                    if self.halt_on_error {
                        break;
                    }
                }
            }
        }

        let result_bytes = Arc::new(current);
        if overall_success && self.caching_enabled && !skip_cache {
            let byte_cost = result_bytes.len() as u64 + 64;
            self.cache.set(Namespace::Transform, &cache_key, CacheValue::Bytes(Arc::clone(&result_bytes)), byte_cost);
        }

        PipelineResult {
            bytes: result_bytes,
            success: overall_success,
            transforms_applied: applied,
            steps,
            from_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, TierConfig};
    use crate::transform::{ConvertMode, TransformKind};
    use std::time::Duration;

    fn cache() -> Arc<MultiCache> {
        let cfg = TierConfig {
            max_entries: 100,
            max_bytes: 1_000_000,
            default_ttl: Duration::from_secs(60),
            enabled: true,
            policy: EvictionPolicy::Lru,
        };
        Arc::new(MultiCache::new(cfg, cfg, cfg))
    }

    #[test]
    fn empty_pipeline_returns_input_unchanged() {
        let pipeline = Pipeline::new(cache(), true, false);
        let result = pipeline.apply(b"hello", "/a.txt", false);
        assert_eq!(*result.bytes, b"hello".to_vec());
        assert_eq!(result.transforms_applied, 0);
        assert!(result.success);
    }

    #[test]
    fn s4_uppercase_then_cache_hit() {
        let pipeline = Pipeline::new(cache(), true, false);
        pipeline.add_transform(
            Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, Some("*.txt")).unwrap(),
        );

        let first = pipeline.apply(b"content1", "/hello.txt", false);
        assert_eq!(*first.bytes, b"CONTENT1".to_vec());
        assert!(!first.from_cache);

        let second = pipeline.apply(b"content1", "/hello.txt", false);
        assert_eq!(*second.bytes, b"CONTENT1".to_vec());
        assert!(second.from_cache);
    }

    #[test]
    fn halt_on_error_stops_remaining_steps() {
        let pipeline = Pipeline::new(cache(), false, true);
        // Decrypt on non-ciphertext input fails, halting before any further step runs.
        pipeline.add_transform(Transform::new("bad", TransformKind::Decrypt { key: [1u8; 32] }, None).unwrap());
        pipeline.add_transform(
            Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, None).unwrap(),
        );
        let result = pipeline.apply(b"short", "/x", true);
        assert!(!result.success);
        assert_eq!(result.transforms_applied, 0);
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn idempotence_with_all_disabled() {
        let pipeline = Pipeline::new(cache(), false, false);
        let mut t = Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, None).unwrap();
        t.enabled = false;
        pipeline.add_transform(t);
        let result = pipeline.apply(b"content1", "/x.txt", true);
        assert_eq!(*result.bytes, b"content1".to_vec());
    }
}
