//! C3 — multi-level cache: three namespaced LRU+TTL tiers with size
//! accounting (spec.md §4.3).

use lru::LruCache;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::rules::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Path,
    Attr,
    Readdir,
    Content,
    Transform,
}

impl Namespace {
    fn as_str(self) -> &'static str {
        match self {
            Namespace::Path => "path",
            Namespace::Attr => "attr",
            Namespace::Readdir => "readdir",
            Namespace::Content => "content",
            Namespace::Transform => "transform",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierId {
    L1,
    L2,
    L3,
}

/// Default namespace-to-tier mapping used by C9 (spec.md §4.3).
pub fn tier_for_namespace(ns: Namespace) -> TierId {
    match ns {
        Namespace::Path | Namespace::Attr | Namespace::Readdir => TierId::L1,
        Namespace::Content => TierId::L2,
        Namespace::Transform => TierId::L3,
    }
}

/// The opaque payload a cache entry carries, with a caller-supplied byte cost.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Path(Option<PathBuf>),
    Attrs(Attributes),
    Readdir(Vec<String>),
    Bytes(Arc<Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    /// Approximated with LRU ordering; see DESIGN.md for the rationale.
    Lfu,
    Fifo,
}

impl EvictionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionPolicy::Lru),
            "lfu" => Some(EvictionPolicy::Lfu),
            "fifo" => Some(EvictionPolicy::Fifo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub max_entries: usize,
    pub max_bytes: u64,
    pub default_ttl: Duration,
    pub enabled: bool,
    pub policy: EvictionPolicy,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes_used: u64,
}

struct StoredEntry {
    value: CacheValue,
    byte_cost: u64,
    inserted_at: Instant,
    ttl: Duration,
}

struct TierInner {
    map: LruCache<String, StoredEntry>,
    bytes_used: u64,
    hits: u64,
    misses: u64,
}

/// One independent LRU+TTL tier, serialized by its own lock (spec.md §5).
pub struct Tier {
    config: TierConfig,
    inner: Mutex<TierInner>,
}

impl Tier {
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(TierInner {
                map: LruCache::unbounded(),
                bytes_used: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn evict_to_fit(&self, inner: &mut TierInner) {
        while inner.map.len() > self.config.max_entries.max(1)
            || inner.bytes_used > self.config.max_bytes
        {
            match inner.map.pop_lru() {
                Some((_, evicted)) => {
                    inner.bytes_used = inner.bytes_used.saturating_sub(evicted.byte_cost);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = match inner.map.peek(key) {
            Some(entry) => now.duration_since(entry.inserted_at) > entry.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            if let Some(entry) = inner.map.pop(key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(entry.byte_cost);
            }
            inner.misses += 1;
            return None;
        }

        let value = if self.config.policy == EvictionPolicy::Fifo {
            inner.map.peek(key).map(|e| e.value.clone())
        } else {
            inner.map.get(key).map(|e| e.value.clone())
        };
        if value.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        value
    }

    pub fn set(&self, key: String, value: CacheValue, byte_cost: u64) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.map.peek(&key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(old.byte_cost);
        }
        let now = Instant::now();
        inner.map.put(
            key,
            StoredEntry { value, byte_cost, inserted_at: now, ttl: self.config.default_ttl },
        );
        inner.bytes_used += byte_cost;
        self.evict_to_fit(&mut inner);
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.map.pop(key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(entry.byte_cost);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.bytes_used = 0;
    }

    pub fn stats(&self) -> TierStats {
        let inner = self.inner.lock();
        TierStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.map.len(),
            bytes_used: inner.bytes_used,
        }
    }
}

/// The C3 façade: three independent tiers (L1/L2/L3), each its own lock.
pub struct MultiCache {
    pub l1: Tier,
    pub l2: Tier,
    pub l3: Tier,
}

impl MultiCache {
    pub fn new(l1: TierConfig, l2: TierConfig, l3: TierConfig) -> Self {
        Self { l1: Tier::new(l1), l2: Tier::new(l2), l3: Tier::new(l3) }
    }

    fn tier(&self, id: TierId) -> &Tier {
        match id {
            TierId::L1 => &self.l1,
            TierId::L2 => &self.l2,
            TierId::L3 => &self.l3,
        }
    }

    fn composite_key(namespace: Namespace, key: &str) -> String {
        format!("{}:{}", namespace.as_str(), key)
    }

    pub fn get_in_tier(&self, namespace: Namespace, key: &str, tier: TierId) -> Option<CacheValue> {
        self.tier(tier).get(&Self::composite_key(namespace, key))
    }

    pub fn set_in_tier(
        &self,
        namespace: Namespace,
        key: &str,
        value: CacheValue,
        byte_cost: u64,
        tier: TierId,
    ) {
        self.tier(tier).set(Self::composite_key(namespace, key), value, byte_cost);
    }

    /// Convenience variants using the default namespace→tier mapping (spec.md §4.3).
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<CacheValue> {
        self.get_in_tier(namespace, key, tier_for_namespace(namespace))
    }

    pub fn set(&self, namespace: Namespace, key: &str, value: CacheValue, byte_cost: u64) {
        self.set_in_tier(namespace, key, value, byte_cost, tier_for_namespace(namespace));
    }

    /// Invalidates `(namespace, key)` across all three tiers.
    pub fn invalidate(&self, namespace: Namespace, key: &str) {
        let composite = Self::composite_key(namespace, key);
        self.l1.invalidate(&composite);
        self.l2.invalidate(&composite);
        self.l3.invalidate(&composite);
    }

    pub fn clear(&self, tier: Option<TierId>) {
        match tier {
            Some(id) => self.tier(id).clear(),
            None => {
                self.l1.clear();
                self.l2.clear();
                self.l3.clear();
            }
        }
    }

    pub fn stats(&self) -> [(&'static str, TierStats); 3] {
        [("l1", self.l1.stats()), ("l2", self.l2.stats()), ("l3", self.l3.stats())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_entries: usize, max_bytes: u64, ttl_ms: u64) -> TierConfig {
        TierConfig {
            max_entries,
            max_bytes,
            default_ttl: Duration::from_millis(ttl_ms),
            enabled: true,
            policy: EvictionPolicy::Lru,
        }
    }

    #[test]
    fn caps_hold_after_insertion() {
        let tier = Tier::new(cfg(2, 1_000_000, 60_000));
        tier.set("a".into(), CacheValue::Readdir(vec![]), 10);
        tier.set("b".into(), CacheValue::Readdir(vec![]), 10);
        tier.set("c".into(), CacheValue::Readdir(vec![]), 10);
        assert!(tier.stats().entries <= 2);
    }

    #[test]
    fn expired_entry_is_absent() {
        let tier = Tier::new(cfg(10, 1_000_000, 1));
        tier.set("a".into(), CacheValue::Readdir(vec![]), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(tier.get("a").is_none());
    }

    #[test]
    fn negative_results_are_not_cached() {
        let cache = MultiCache::new(cfg(10, 1_000, 60_000), cfg(10, 1_000, 60_000), cfg(10, 1_000, 60_000));
        assert!(cache.get(Namespace::Path, "missing").is_none());
        // absence is authoritative and never inserted as a sentinel
        assert_eq!(cache.l1.stats().entries, 0);
    }

    #[test]
    fn invalidate_removes_from_all_tiers() {
        let cache = MultiCache::new(cfg(10, 1_000, 60_000), cfg(10, 1_000, 60_000), cfg(10, 1_000, 60_000));
        cache.set(Namespace::Path, "/a", CacheValue::Path(None), 8);
        assert!(cache.get(Namespace::Path, "/a").is_some());
        cache.invalidate(Namespace::Path, "/a");
        assert!(cache.get(Namespace::Path, "/a").is_none());
    }

    #[test]
    fn byte_cap_evicts_lru() {
        let tier = Tier::new(cfg(100, 25, 60_000));
        tier.set("a".into(), CacheValue::Readdir(vec![]), 10);
        tier.set("b".into(), CacheValue::Readdir(vec![]), 10);
        tier.set("c".into(), CacheValue::Readdir(vec![]), 10);
        assert!(tier.stats().bytes_used <= 25);
    }
}
