//! Configuration types for nzb-vfs

use serde::{Deserialize, Serialize};

/// Archive analyzer tuning (RAR and 7z)
///
/// These knobs are forwarded to the embedder's segment-fetch layer and bound
/// the analyzers' read behavior. They are runtime-reloadable through
/// [`crate::import::Processor::reload_analyzer_settings`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Maximum parallel fetch workers an analysis run may use (default: 40)
    #[serde(default = "default_analyzer_workers")]
    pub max_workers: usize,

    /// Fetch cache budget in megabytes (default: 128)
    #[serde(default = "default_cache_size_mb")]
    pub max_cache_size_mb: usize,

    /// Whether whole archives small enough may be preloaded into memory
    /// before analysis (default: true)
    #[serde(default = "default_true")]
    pub enable_memory_preload: bool,

    /// Upper bound for in-memory preloading, in gigabytes (default: 8)
    #[serde(default = "default_max_memory_gb")]
    pub max_memory_gb: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_analyzer_workers(),
            max_cache_size_mb: default_cache_size_mb(),
            enable_memory_preload: true,
            max_memory_gb: default_max_memory_gb(),
        }
    }
}

/// Import pipeline configuration
///
/// One explicit struct passed into each component at construction; the
/// pipeline reads no ambient global state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Maximum concurrent imports in the worker pool (default: 10)
    #[serde(default = "default_max_concurrent_imports")]
    pub max_concurrent_imports: usize,

    /// Archive analyzer tuning
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Name of the transient queue directory; manifests arriving from under
    /// it are placed at the virtual filesystem root (default: "nzbvfs-queue")
    #[serde(default = "default_queue_dir_name")]
    pub queue_dir_name: String,

    /// Hard limit on nested-archive recursion. Level 1 is the archive
    /// itself, level 2 an archive found inside it; anything deeper is
    /// logged and skipped (default: 2)
    #[serde(default = "default_max_nested_depth")]
    pub max_nested_depth: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_concurrent_imports: default_max_concurrent_imports(),
            analyzer: AnalyzerConfig::default(),
            queue_dir_name: default_queue_dir_name(),
            max_nested_depth: default_max_nested_depth(),
        }
    }
}

fn default_analyzer_workers() -> usize {
    40
}

fn default_cache_size_mb() -> usize {
    128
}

fn default_max_memory_gb() -> usize {
    8
}

fn default_max_concurrent_imports() -> usize {
    10
}

fn default_queue_dir_name() -> String {
    "nzbvfs-queue".to_string()
}

fn default_max_nested_depth() -> usize {
    2
}

fn default_true() -> bool {
    true
}
