//! System-wide resource limits and cache defaults.
//!
//! Carried over from the original `shadowfs.core.constants.Limits` table
//! (see `examples/original_source/shadowfs/core/constants.py`), which
//! spec.md's distillation dropped but which a complete implementation keeps
//! as built-in defaults and validation bounds.

/// Largest file StrataFS will read through the transform pipeline in one call.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Largest byte count a single transform step may emit before its output is
/// treated as a failure (original bytes pass through unchanged).
pub const MAX_TRANSFORM_OUTPUT: usize = 100 * 1024 * 1024; // 100 MiB

/// Enforced at config validation: source paths, and rule/transform patterns,
/// may not exceed this length (`Config::validate`).
pub const MAX_PATH_LENGTH: usize = 4096;
/// Enforced at config validation: a virtual layer name becomes a directory
/// entry in the mount, so it's bounded the same as a real filename
/// (`Config::validate`).
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Config validation bound: at most this many virtual layers may be configured.
pub const MAX_VIRTUAL_LAYERS: usize = 50;

/// Default namespace-to-tier cache sizing, used when `cache` config keys are absent.
pub mod cache_defaults {
    pub const ATTR_CACHE_ENTRIES: usize = 10_000;
    pub const ATTR_CACHE_TTL_SECS: u64 = 60;

    pub const CONTENT_CACHE_SIZE_MB: u64 = 512;
    pub const CONTENT_CACHE_TTL_SECS: u64 = 300;

    pub const TRANSFORM_CACHE_SIZE_MB: u64 = 1024;
    pub const TRANSFORM_CACHE_TTL_SECS: u64 = 600;

    pub const DEFAULT_CACHE_SIZE_MB: u64 = 512;
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
}

/// Default sidecar tag-file suffix (spec.md §4.5.3 / §6).
pub const DEFAULT_TAG_SUFFIX: &str = ".tags";
