// src/config.rs
// =============================================================================
// Crawl configuration.
//
// A CrawlConfig is read once before the crawl starts and never changes while
// the crawl runs. It can come from three places, later ones winning:
// 1. Built-in defaults (CrawlConfig::default)
// 2. An optional JSON file (--config crawl.json)
// 3. Command-line flags (applied in main.rs)
//
// Every field has a default, so a config file only needs the keys it wants
// to change:
//
//   { "maxDepth": 3, "strategy": "parallel", "transforms": ["grayscale"] }
// =============================================================================

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::imaging::TransformKind;

// How branches of the crawl are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    /// One page / image at a time, depth-first
    Sequential,
    /// Futures interleaved on the current task
    Concurrent,
    /// Every branch spawned onto the multi-threaded runtime
    Parallel,
}

// Where pages and images are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Local,
}

// Where transforms are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformLocation {
    Local,
    Remote,
}

// Where downloaded and derived images are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLocation {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlConfig {
    pub strategy: CrawlStrategy,

    /// Number of link hops allowed from the root page
    pub max_depth: usize,

    pub transforms: Vec<TransformKind>,

    pub source: SourceKind,

    pub transform_location: TransformLocation,

    /// Base URL of the transform service, required for remote transforms
    pub remote_transform_url: Option<String>,

    pub cache: CacheLocation,

    /// Required when `cache` is `disk`
    pub cache_dir: Option<PathBuf>,

    /// Upper bound on concurrent branches and in-flight requests
    pub concurrency: usize,

    /// Only follow links on the root page's host
    pub stay_on_domain: bool,

    pub request_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            strategy: CrawlStrategy::Concurrent,
            max_depth: 2,
            transforms: TransformKind::value_variants().to_vec(),
            source: SourceKind::Web,
            transform_location: TransformLocation::Local,
            remote_transform_url: None,
            cache: CacheLocation::Memory,
            cache_dir: None,
            concurrency: 16,
            stay_on_domain: true,
            request_timeout_secs: 10,
            user_agent: String::from("image-crawler/0.1"),
        }
    }
}

impl CrawlConfig {
    // Reads a JSON config file; missing keys fall back to the defaults
    pub fn load(path: &Path) -> Result<Self, CrawlError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: CrawlConfig = serde_json::from_str(&raw).map_err(|e| {
            CrawlError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    // Rejects combinations that can never produce a working crawl
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency == 0 {
            return Err(CrawlError::Config("concurrency must be at least 1".into()));
        }

        if self.user_agent.trim().is_empty() {
            return Err(CrawlError::Config("user agent must not be empty".into()));
        }

        if self.transform_location == TransformLocation::Remote
            && self.remote_transform_url.is_none()
        {
            return Err(CrawlError::Config(
                "remote transforms need a remoteTransformUrl".into(),
            ));
        }

        if self.cache == CacheLocation::Disk && self.cache_dir.is_none() {
            return Err(CrawlError::Config("disk cache needs a cacheDir".into()));
        }

        Ok(())
    }
}
