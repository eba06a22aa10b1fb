// src/crawl/mod.rs
// =============================================================================
// The crawl engine.
//
// Submodules:
// - traversal: the recursive page walk (visited set, depth budget)
// - pipeline: download / transform / cache for the images of each page
// - strategy: how sibling branches are scheduled (sequential, concurrent,
//   parallel)
//
// A Crawler owns everything one crawl needs and is consumed by
// perform_crawl, so every run starts with an empty visited set and empty
// download slots. Only the cache store can outlive a run (disk cache).
// =============================================================================

mod pipeline;
mod strategy;
mod traversal;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{CacheStore, DiskStore, MemoryStore};
use crate::config::{CacheLocation, CrawlConfig, CrawlStrategy, SourceKind, TransformLocation};
use crate::error::CrawlError;
use crate::imaging::{RemoteTransformer, Transform};
use crate::page::{LocalFetcher, PageFetcher, Throttled, WebFetcher};

use pipeline::ImagePipeline;

// State shared by every branch of one crawl
pub struct CrawlContext {
    config: CrawlConfig,
    root: Url,
    visited: DashSet<String>,
    pages_visited: AtomicUsize,
    fetcher: Arc<dyn PageFetcher>,
    pipeline: Arc<ImagePipeline>,
}

impl CrawlContext {
    // Whether a link found on some page may be followed.
    //
    // Same host, and the same explicit port if either side names one.
    // http and https on their default ports count as the same site.
    fn in_scope(&self, link: &Url) -> bool {
        !self.config.stay_on_domain
            || (link.host_str() == self.root.host_str() && link.port() == self.root.port())
    }
}

// What a finished crawl reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub root_url: String,
    pub max_depth: usize,
    pub strategy: CrawlStrategy,
    pub transforms: Vec<String>,
    pub pages_visited: usize,
    pub images_produced: usize,
    pub elapsed_ms: u128,
}

pub struct Crawler {
    ctx: Arc<CrawlContext>,
}

impl Crawler {
    // Crawler with a hand-picked transform list instead of the configured one
    #[cfg(test)]
    pub fn with_transforms(
        config: CrawlConfig,
        root: &str,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CacheStore>,
        transforms: Vec<Arc<dyn Transform>>,
    ) -> Result<Self, CrawlError> {
        Self::build(config, root, fetcher, store, transforms, None)
    }

    // Builds the fetcher, store and transformer that `config` asks for.
    //
    // For a web crawl `root` is the start URL; for a local crawl it is the
    // directory holding the mirrored site.
    pub fn from_config(config: CrawlConfig, root: &str) -> Result<Self, CrawlError> {
        config.validate()?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let (fetcher, root_url): (Arc<dyn PageFetcher>, String) = match config.source {
            SourceKind::Web => {
                let web = WebFetcher::new(&config.user_agent, timeout)
                    .map_err(|e| CrawlError::Config(format!("cannot build HTTP client: {e}")))?;
                (Arc::new(web), root.to_string())
            }
            SourceKind::Local => {
                let local = LocalFetcher::new(root)?;
                let url = local.root_url()?.to_string();
                (Arc::new(local), url)
            }
        };

        let store: Arc<dyn CacheStore> = match (config.cache, &config.cache_dir) {
            (CacheLocation::Memory, _) => Arc::new(MemoryStore::new()),
            (CacheLocation::Disk, Some(dir)) => {
                let disk = DiskStore::new(dir.clone());
                debug!(dir = %disk.root().display(), "using disk cache");
                Arc::new(disk)
            }
            (CacheLocation::Disk, None) => {
                return Err(CrawlError::Config("disk cache needs a cacheDir".into()))
            }
        };

        let remote = match (config.transform_location, &config.remote_transform_url) {
            (TransformLocation::Local, _) => None,
            (TransformLocation::Remote, Some(url)) => {
                let remote = RemoteTransformer::new(url, timeout)
                    .map_err(|e| CrawlError::Config(e.to_string()))?;
                debug!(endpoint = %remote.endpoint(), "using remote transforms");
                Some(Arc::new(remote))
            }
            (TransformLocation::Remote, None) => {
                return Err(CrawlError::Config(
                    "remote transforms need a remoteTransformUrl".into(),
                ))
            }
        };

        let transforms = config.transforms.iter().map(|kind| kind.build()).collect();
        Self::build(config, &root_url, fetcher, store, transforms, remote)
    }

    fn build(
        config: CrawlConfig,
        root: &str,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CacheStore>,
        transforms: Vec<Arc<dyn Transform>>,
        remote: Option<Arc<RemoteTransformer>>,
    ) -> Result<Self, CrawlError> {
        let mut root = Url::parse(root)
            .map_err(|e| CrawlError::Config(format!("invalid root URL {root}: {e}")))?;
        root.set_fragment(None);

        // Pages and images share one request budget
        let fetcher: Arc<dyn PageFetcher> = Arc::new(Throttled::new(fetcher, config.concurrency));

        let mut pipeline = ImagePipeline::new(
            fetcher.clone(),
            store,
            transforms,
            config.strategy,
            config.concurrency,
        );
        if let Some(remote) = remote {
            pipeline = pipeline.with_remote(remote);
        }

        Ok(Self {
            ctx: Arc::new(CrawlContext {
                config,
                root,
                visited: DashSet::new(),
                pages_visited: AtomicUsize::new(0),
                fetcher,
                pipeline: Arc::new(pipeline),
            }),
        })
    }

    pub fn root(&self) -> &Url {
        &self.ctx.root
    }

    // Crawls from the root page and reports what was produced.
    //
    // Fails only on fatal errors; pages and images that cannot be loaded are
    // logged and skipped.
    pub async fn perform_crawl(self) -> Result<CrawlSummary, CrawlError> {
        let ctx = self.ctx;
        let started = Instant::now();
        let transforms = ctx.pipeline.transform_names();

        info!(
            root = %ctx.root,
            max_depth = ctx.config.max_depth,
            strategy = ?ctx.config.strategy,
            transforms = ?transforms,
            "starting crawl"
        );

        let crawled =
            traversal::crawl_page(ctx.clone(), ctx.root.to_string(), ctx.config.max_depth).await;
        let images = match crawled {
            Ok(images) => images,
            Err(e) => {
                // Recoverable errors are absorbed at the page or image they hit
                debug_assert!(e.is_fatal());
                error!(root = %ctx.root, error = %e, "crawl aborted");
                return Err(e);
            }
        };

        let summary = CrawlSummary {
            root_url: ctx.root.to_string(),
            max_depth: ctx.config.max_depth,
            strategy: ctx.config.strategy,
            transforms,
            pages_visited: ctx.pages_visited.load(Ordering::SeqCst),
            images_produced: images.len(),
            elapsed_ms: started.elapsed().as_millis(),
        };

        info!(
            pages = summary.pages_visited,
            images = summary.images_produced,
            elapsed_ms = %summary.elapsed_ms,
            "crawl finished"
        );

        Ok(summary)
    }
}
