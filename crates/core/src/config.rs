//! Configuration record (spec.md §6) with aggregated multi-error validation,
//! following the field set of `shadowfs.core.validators.validate_config`
//! (see `examples/original_source/shadowfs/core/validators.py`) but reporting
//! every problem found rather than stopping at the first.

use crate::cache::EvictionPolicy;
use crate::error::{StrataError, StrataResult};
use crate::limits::{cache_defaults, MAX_FILENAME_LENGTH, MAX_PATH_LENGTH, MAX_VIRTUAL_LAYERS};
use crate::rules::Rule;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub readonly: bool,
}

/// One classify function for a classifier or hierarchical layer config
/// (spec.md §9's closed builtin set).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClassifyConfig {
    Extension,
    SizeBucket,
    MimeMajor,
    PatternList { groups: Vec<(String, Vec<String>)> },
}

/// One tag extractor for a tag layer config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TagExtractorConfig {
    Xattr { key: String },
    Sidecar { #[serde(default = "default_tag_suffix")] suffix: String },
    FilenamePattern { pairs: Vec<(String, String)> },
    PathPattern { pairs: Vec<(String, String)> },
    ExtensionGroup { groups: Vec<(String, Vec<String>)> },
}

fn default_tag_suffix() -> String {
    crate::limits::DEFAULT_TAG_SUFFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VirtualLayerConfig {
    Classifier {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        classify: ClassifyConfig,
    },
    Date {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        field: String,
    },
    Tag {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        extractors: Vec<TagExtractorConfig>,
    },
    Hierarchical {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        levels: Vec<ClassifyConfig>,
    },
}

impl VirtualLayerConfig {
    pub fn name(&self) -> &str {
        match self {
            VirtualLayerConfig::Classifier { name, .. }
            | VirtualLayerConfig::Date { name, .. }
            | VirtualLayerConfig::Tag { name, .. }
            | VirtualLayerConfig::Hierarchical { name, .. } => name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            VirtualLayerConfig::Classifier { enabled, .. }
            | VirtualLayerConfig::Date { enabled, .. }
            | VirtualLayerConfig::Tag { enabled, .. }
            | VirtualLayerConfig::Hierarchical { enabled, .. } => *enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformTypeName {
    Template,
    Compress,
    Decompress,
    Encrypt,
    Decrypt,
    Convert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransformTypeName,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Required for `encrypt`/`decrypt`: 64 hex characters (32 bytes, AES-256).
    #[serde(default)]
    pub key_hex: Option<String>,
    /// Required for `convert`: one of `upper`, `lower`, `markdown_to_html`,
    /// `csv_to_json`, `json_to_csv`, `yaml_to_json`.
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size_mb: f64,
    pub ttl_seconds: f64,
    pub eviction_policy: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: cache_defaults::DEFAULT_CACHE_SIZE_MB as f64,
            ttl_seconds: cache_defaults::DEFAULT_CACHE_TTL_SECS as f64,
            eviction_policy: "lru".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9090 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub virtual_layers: Vec<VirtualLayerConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn load(path: &std::path::Path) -> StrataResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| StrataError::InvalidInput(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every validation problem rather than stopping at the first
    /// (SPEC_FULL.md §2.3), unlike the original's raise-on-first-error style.
    pub fn validate(&self) -> StrataResult<()> {
        let mut errors = Vec::new();

        let version_re = Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("static regex");
        if !version_re.is_match(&self.version) {
            errors.push(format!("invalid version format: `{}`, expected X.Y or X.Y.Z", self.version));
        }

        for (i, source) in self.sources.iter().enumerate() {
            if source.path.as_os_str().is_empty() {
                errors.push(format!("sources[{i}]: path cannot be empty"));
            }
            if source.path.as_os_str().len() > MAX_PATH_LENGTH {
                errors.push(format!("sources[{i}]: path exceeds the {MAX_PATH_LENGTH} byte maximum"));
            }
            if source.priority < 0 {
                errors.push(format!("sources[{i}]: priority must be non-negative, got {}", source.priority));
            }
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.patterns.is_empty() && rule.conditions.is_empty() {
                errors.push(format!(
                    "rules[{i}] `{}`: must have at least one pattern or condition",
                    rule.name.as_deref().unwrap_or("<unnamed>")
                ));
            }
            for pattern in &rule.patterns {
                if pattern.len() > MAX_PATH_LENGTH {
                    errors.push(format!(
                        "rules[{i}] `{}`: pattern exceeds the {MAX_PATH_LENGTH} byte maximum",
                        rule.name.as_deref().unwrap_or("<unnamed>")
                    ));
                }
            }
        }

        for (i, transform) in self.transforms.iter().enumerate() {
            if transform.name.is_empty() {
                errors.push(format!("transforms[{i}]: name cannot be empty"));
            }
            if transform.pattern.is_empty() {
                errors.push(format!("transforms[{i}] `{}`: pattern cannot be empty", transform.name));
            }
            if transform.pattern.len() > MAX_PATH_LENGTH {
                errors.push(format!(
                    "transforms[{i}] `{}`: pattern exceeds the {MAX_PATH_LENGTH} byte maximum",
                    transform.name
                ));
            }
            match transform.kind {
                TransformTypeName::Encrypt | TransformTypeName::Decrypt => match &transform.key_hex {
                    Some(hex) if hex.len() == 64 && hex::decode(hex).is_ok() => {}
                    _ => errors.push(format!(
                        "transforms[{i}] `{}`: encrypt/decrypt requires a 64 hex-character `key_hex`",
                        transform.name
                    )),
                },
                TransformTypeName::Convert => match transform.mode.as_deref() {
                    Some("upper") | Some("lower") | Some("markdown_to_html") | Some("csv_to_json")
                    | Some("json_to_csv") | Some("yaml_to_json") => {}
                    _ => errors.push(format!(
                        "transforms[{i}] `{}`: convert requires `mode` of upper/lower/markdown_to_html/csv_to_json/json_to_csv/yaml_to_json",
                        transform.name
                    )),
                },
                _ => {}
            }
        }

        if self.virtual_layers.len() > MAX_VIRTUAL_LAYERS {
            errors.push(format!(
                "virtual_layers: {} exceeds the maximum of {MAX_VIRTUAL_LAYERS}",
                self.virtual_layers.len()
            ));
        }
        let name_re = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").expect("static regex");
        for (i, layer) in self.virtual_layers.iter().enumerate() {
            let name = layer.name();
            if !name_re.is_match(name) || name.len() > MAX_FILENAME_LENGTH {
                errors.push(format!(
                    "virtual_layers[{i}]: invalid name `{name}` (must start with a letter, contain only letters/digits/_/-, and be ≤{MAX_FILENAME_LENGTH} chars — a layer name becomes a directory entry in the mount)"
                ));
            }
            if let VirtualLayerConfig::Date { field, .. } = layer {
                if !matches!(field.as_str(), "mtime" | "ctime" | "atime") {
                    errors.push(format!("virtual_layers[{i}] `{name}`: date field must be mtime/ctime/atime, got `{field}`"));
                }
            }
            if let VirtualLayerConfig::Hierarchical { levels, .. } = layer {
                if levels.is_empty() {
                    errors.push(format!("virtual_layers[{i}] `{name}`: hierarchical layer needs at least one level"));
                }
            }
        }

        if self.cache.max_size_mb <= 0.0 {
            errors.push(format!("cache.max_size_mb must be positive, got {}", self.cache.max_size_mb));
        }
        if self.cache.ttl_seconds <= 0.0 {
            errors.push(format!("cache.ttl_seconds must be positive, got {}", self.cache.ttl_seconds));
        }
        if EvictionPolicy::parse(&self.cache.eviction_policy).is_none() {
            errors.push(format!(
                "cache.eviction_policy must be one of lru/lfu/fifo, got `{}`",
                self.cache.eviction_policy
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            errors.push("metrics.port must be in 1..=65535 when metrics are enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StrataError::InvalidInput(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config {
            version: "1.0".to_string(),
            sources: vec![],
            readonly: false,
            allow_other: false,
            rules: vec![],
            transforms: vec![],
            virtual_layers: vec![],
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut c = minimal();
        c.version = "not-a-version".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn all_problems_are_reported_together() {
        let mut c = minimal();
        c.version = "bad".to_string();
        c.cache.max_size_mb = -1.0;
        c.cache.eviction_policy = "mru".to_string();
        let err = c.validate().unwrap_err().to_string();
        assert!(err.contains("version"));
        assert!(err.contains("max_size_mb"));
        assert!(err.contains("eviction_policy"));
    }

    #[test]
    fn encrypt_transform_requires_key_hex() {
        let mut c = minimal();
        c.transforms.push(TransformConfig {
            name: "enc".to_string(),
            kind: TransformTypeName::Encrypt,
            pattern: "*.txt".to_string(),
            enabled: true,
            key_hex: None,
            mode: None,
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn convert_transform_requires_a_known_mode() {
        let mut c = minimal();
        c.transforms.push(TransformConfig {
            name: "conv".to_string(),
            kind: TransformTypeName::Convert,
            pattern: "*.csv".to_string(),
            enabled: true,
            key_hex: None,
            mode: Some("xml_to_json".to_string()),
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn invalid_layer_name_is_rejected() {
        let mut c = minimal();
        c.virtual_layers.push(VirtualLayerConfig::Classifier {
            name: "1-bad-name".to_string(),
            enabled: true,
            classify: ClassifyConfig::Extension,
        });
        assert!(c.validate().is_err());
    }
}
