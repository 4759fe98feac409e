//! Cross-module scenarios from spec.md §8 that exercise more than one
//! component together (S1/S2 are covered as unit tests alongside their
//! layers; these are the ones that span the rule engine, pipeline, cache,
//! and wiring).

use std::fs;
use std::sync::Arc;

use stratafs_core::cache::{EvictionPolicy, MultiCache, Namespace, TierConfig};
use stratafs_core::config::{
    CacheConfig, ClassifyConfig, Config, LoggingConfig, MetricsConfig, SourceConfig,
    TransformConfig, TransformTypeName, VirtualLayerConfig,
};
use stratafs_core::pattern::PatternDialect;
use stratafs_core::pipeline::Pipeline;
use stratafs_core::rules::{Combinator, Rule, RuleAction, RuleEngine};
use stratafs_core::transform::{ConvertMode, Transform, TransformKind};
use tempfile::tempdir;

fn tier(ttl_secs: u64) -> TierConfig {
    TierConfig {
        max_entries: 1_000,
        max_bytes: 10_000_000,
        default_ttl: std::time::Duration::from_secs(ttl_secs),
        enabled: true,
        policy: EvictionPolicy::Lru,
    }
}

fn minimal_config(dir: &std::path::Path) -> Config {
    Config {
        version: "1.0".to_string(),
        sources: vec![SourceConfig { path: dir.to_path_buf(), priority: 0, readonly: false }],
        readonly: false,
        allow_other: false,
        rules: vec![],
        transforms: vec![],
        virtual_layers: vec![VirtualLayerConfig::Classifier {
            name: "by-type".to_string(),
            enabled: true,
            classify: ClassifyConfig::Extension,
        }],
        cache: CacheConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

/// S3 — rule exclusion: `drop.tmp` is invisible, `keep.txt` is not, and a
/// directory listing filtered the same way the kernel handler filters
/// `readdir` omits it.
#[test]
fn s3_rule_exclusion_hides_matching_files_from_listing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), b"hi").unwrap();
    fs::write(dir.path().join("drop.tmp"), b"bye").unwrap();

    let mut rules = RuleEngine::new(RuleAction::Include);
    rules
        .add_rule(Rule {
            name: Some("no-tmp".to_string()),
            action: RuleAction::Exclude,
            patterns: vec!["*.tmp".to_string()],
            pattern_dialect: PatternDialect::Glob,
            conditions: vec![],
            combinator: Combinator::All,
            priority: 100,
            enabled: true,
        })
        .unwrap();

    assert!(rules.visible("keep.txt", None));
    assert!(!rules.visible("drop.tmp", None));

    let mut listing: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| rules.visible(name, None))
        .collect();
    listing.sort();
    assert_eq!(listing, vec!["keep.txt".to_string()]);
}

/// S4 — a `.txt`-scoped uppercase transform applies on read, and a second
/// read of identical bytes comes back from the transform cache.
#[test]
fn s4_uppercase_transform_then_cache_hit() {
    let cache = Arc::new(MultiCache::new(tier(60), tier(60), tier(60)));
    let pipeline = Pipeline::new(Arc::clone(&cache), true, true);
    pipeline.add_transform(
        Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, Some("*.txt")).unwrap(),
    );

    let first = pipeline.apply(b"content1", "/hello.txt", false);
    assert_eq!(*first.bytes, b"CONTENT1".to_vec());
    assert!(!first.from_cache);

    let second = pipeline.apply(b"content1", "/hello.txt", false);
    assert_eq!(*second.bytes, b"CONTENT1".to_vec());
    assert!(second.from_cache);
    assert_eq!(cache.l3.stats().hits, 1);
}

/// S5 — after a write, the transformed-content cache entry for the path
/// must no longer serve stale bytes on the next read.
#[test]
fn s5_write_invalidates_transformed_cache_entry() {
    let cache = Arc::new(MultiCache::new(tier(60), tier(60), tier(60)));
    let pipeline = Pipeline::new(Arc::clone(&cache), true, true);
    pipeline.add_transform(
        Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, Some("*.txt")).unwrap(),
    );

    let first = pipeline.apply(b"content1", "/hello.txt", false);
    assert_eq!(*first.bytes, b"CONTENT1".to_vec());

    // A write changes the on-disk bytes; the handler's invalidate-on-write
    // path drops both the raw-content and `:transformed` cache entries for
    // the path before the kernel is allowed to read again.
    cache.invalidate(Namespace::Content, "/hello.txt");
    cache.invalidate(Namespace::Content, "/hello.txt:transformed");

    let after_write = pipeline.apply(b"zzztent1", "/hello.txt", false);
    assert_eq!(*after_write.bytes, b"ZZZTENT1".to_vec());
    assert!(!after_write.from_cache);
}

/// S6 — a readonly-configured assembly reports readonly, matching every
/// write-bearing kernel callback's early `ReadOnly` guard.
#[test]
fn s6_readonly_config_flows_through_to_the_handler() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), b"content1").unwrap();

    let mut config = minimal_config(dir.path());
    config.readonly = true;

    let assembly = stratafs_core::wiring::build(&config).unwrap();
    assert!(assembly.handler.is_readonly());
}

/// Config-level transform validation: an `encrypt` transform without a
/// `key_hex` is rejected before anything gets wired up (SPEC_FULL.md §2.3).
#[test]
fn encrypt_transform_config_without_key_is_rejected_before_wiring() {
    let dir = tempdir().unwrap();
    let mut config = minimal_config(dir.path());
    config.transforms.push(TransformConfig {
        name: "enc".to_string(),
        kind: TransformTypeName::Encrypt,
        pattern: "*.secret".to_string(),
        enabled: true,
        key_hex: None,
        mode: None,
    });
    assert!(config.validate().is_err());
}
