//! C10 — wiring: assembles a [`StrataHandler`] and its supporting components
//! from a loaded [`Config`] (spec.md §6).

use crate::cache::{EvictionPolicy, MultiCache, TierConfig};
use crate::config::{ClassifyConfig, Config, TagExtractorConfig, VirtualLayerConfig};
use crate::error::{StrataError, StrataResult};
use crate::handler::StrataHandler;
use crate::layers::{
    ClassifierLayer, ClassifyFn, DateLayer, HierarchicalLayer, Layer, TagExtractor, TagLayer,
    TimestampField,
};
use crate::manager::LayerManager;
use crate::pipeline::Pipeline;
use crate::rules::{RuleAction, RuleEngine};
use crate::transform::{ConvertMode, Transform, TransformKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn classify_fn_from_config(cfg: &ClassifyConfig) -> ClassifyFn {
    match cfg {
        ClassifyConfig::Extension => ClassifyFn::Extension,
        ClassifyConfig::SizeBucket => ClassifyFn::SizeBucket,
        ClassifyConfig::MimeMajor => ClassifyFn::MimeMajor,
        ClassifyConfig::PatternList { groups } => ClassifyFn::PatternList(groups.clone()),
    }
}

fn tag_extractor_from_config(cfg: &TagExtractorConfig) -> TagExtractor {
    match cfg {
        TagExtractorConfig::Xattr { key } => TagExtractor::Xattr(key.clone()),
        TagExtractorConfig::Sidecar { suffix } => TagExtractor::Sidecar(suffix.clone()),
        TagExtractorConfig::FilenamePattern { pairs } => TagExtractor::FilenamePattern(pairs.clone()),
        TagExtractorConfig::PathPattern { pairs } => TagExtractor::PathPattern(pairs.clone()),
        TagExtractorConfig::ExtensionGroup { groups } => TagExtractor::ExtensionGroup(groups.clone()),
    }
}

fn layer_from_config(cfg: &VirtualLayerConfig) -> Layer {
    match cfg {
        VirtualLayerConfig::Classifier { name, classify, .. } => {
            Layer::Classifier(ClassifierLayer::new(name.clone(), classify_fn_from_config(classify)))
        }
        VirtualLayerConfig::Date { name, field, .. } => {
            let field = match field.as_str() {
                "ctime" => TimestampField::Ctime,
                "atime" => TimestampField::Atime,
                _ => TimestampField::Mtime,
            };
            Layer::Date(DateLayer::new(name.clone(), field))
        }
        VirtualLayerConfig::Tag { name, extractors, .. } => {
            let extractors = extractors.iter().map(tag_extractor_from_config).collect();
            Layer::Tag(TagLayer::new(name.clone(), extractors))
        }
        VirtualLayerConfig::Hierarchical { name, levels, .. } => {
            let levels = levels.iter().map(classify_fn_from_config).collect();
            Layer::Hierarchical(HierarchicalLayer::new(name.clone(), levels))
        }
    }
}

fn key_from_hex(hex_str: &str) -> StrataResult<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| StrataError::InvalidInput(format!("invalid key_hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| StrataError::InvalidInput("key_hex must decode to exactly 32 bytes".to_string()))
}

fn transform_from_config(cfg: &crate::config::TransformConfig) -> StrataResult<Transform> {
    use crate::config::TransformTypeName;
    let kind = match cfg.kind {
        TransformTypeName::Template => TransformKind::Template,
        TransformTypeName::Compress => TransformKind::Compress,
        TransformTypeName::Decompress => TransformKind::Decompress,
        TransformTypeName::Encrypt => {
            let key = key_from_hex(cfg.key_hex.as_deref().unwrap_or_default())?;
            TransformKind::Encrypt { key }
        }
        TransformTypeName::Decrypt => {
            let key = key_from_hex(cfg.key_hex.as_deref().unwrap_or_default())?;
            TransformKind::Decrypt { key }
        }
        TransformTypeName::Convert => {
            let mode = match cfg.mode.as_deref() {
                Some("lower") => ConvertMode::Lower,
                Some("markdown_to_html") => ConvertMode::MarkdownToHtml,
                Some("csv_to_json") => ConvertMode::CsvToJson,
                Some("json_to_csv") => ConvertMode::JsonToCsv,
                Some("yaml_to_json") => ConvertMode::YamlToJson,
                _ => ConvertMode::Upper,
            };
            TransformKind::Convert { mode }
        }
    };
    let pattern = if cfg.pattern.is_empty() { None } else { Some(cfg.pattern.as_str()) };
    let mut transform = Transform::new(cfg.name.clone(), kind, pattern)?;
    transform.enabled = cfg.enabled;
    Ok(transform)
}

/// Builds a [`RuleEngine`] from a [`Config`]'s rule list, shared by the
/// initial assembly and by a later config reload (the control facade's
/// `/config/reload`).
pub fn rule_engine_from_config(config: &Config) -> StrataResult<RuleEngine> {
    let mut rules = RuleEngine::new(RuleAction::Include);
    for rule in &config.rules {
        rules.add_rule(rule.clone())?;
    }
    Ok(rules)
}

/// Everything `main` needs to mount and serve a StrataFS instance.
pub struct Assembly {
    pub handler: StrataHandler,
    pub cache: Arc<MultiCache>,
}

/// Builds a full [`Assembly`] from a validated [`Config`] (spec.md §6's
/// startup sequence): sources, layers, rules, transform pipeline, cache
/// tiers, then the kernel handler tying them together.
pub fn build(config: &Config) -> StrataResult<Assembly> {
    let mut manager = LayerManager::new();
    for source in &config.sources {
        manager.add_source(source.path.clone(), source.priority, source.readonly)?;
    }
    for layer_cfg in &config.virtual_layers {
        if layer_cfg.enabled() {
            manager.add_layer(layer_from_config(layer_cfg))?;
        }
    }
    manager.scan();
    manager.rebuild_indexes();
    info!(sources = manager.sources().len(), layers = manager.list_layers().len(), "assembled layer manager");

    let rules = rule_engine_from_config(config)?;

    let cache = Arc::new(MultiCache::new(
        tier_config(&config.cache, crate::limits::cache_defaults::ATTR_CACHE_ENTRIES, crate::limits::cache_defaults::ATTR_CACHE_TTL_SECS),
        tier_config(&config.cache, 0, crate::limits::cache_defaults::CONTENT_CACHE_TTL_SECS),
        tier_config(&config.cache, 0, crate::limits::cache_defaults::TRANSFORM_CACHE_TTL_SECS),
    ));

    let pipeline = Arc::new(Pipeline::new(Arc::clone(&cache), config.cache.enabled, true));
    for transform_cfg in &config.transforms {
        pipeline.add_transform(transform_from_config(transform_cfg)?);
    }

    let handler = StrataHandler::new(manager, rules, Arc::clone(&cache), pipeline, config.readonly);
    Ok(Assembly { handler, cache })
}

fn tier_config(cache_cfg: &crate::config::CacheConfig, entries_default: usize, ttl_default: u64) -> TierConfig {
    let policy = EvictionPolicy::parse(&cache_cfg.eviction_policy).unwrap_or(EvictionPolicy::Lru);
    let max_entries = if entries_default > 0 { entries_default } else { 50_000 };
    let max_bytes = (cache_cfg.max_size_mb * 1024.0 * 1024.0) as u64;
    let ttl = if cache_cfg.ttl_seconds > 0.0 { cache_cfg.ttl_seconds } else { ttl_default as f64 };
    TierConfig {
        max_entries,
        max_bytes: max_bytes.max(1),
        default_ttl: Duration::from_secs_f64(ttl),
        enabled: cache_cfg.enabled,
        policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, LoggingConfig, MetricsConfig, SourceConfig};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn builds_assembly_from_minimal_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let config = Config {
            version: "1.0".to_string(),
            sources: vec![SourceConfig { path: dir.path().to_path_buf(), priority: 0, readonly: false }],
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
        };

        let assembly = build(&config).unwrap();
        assert!(Arc::strong_count(&assembly.cache) >= 1);
    }
}
