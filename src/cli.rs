// src/cli.rs
// =============================================================================
// Command-line interface, declared with clap's derive API.
//
// Every crawl flag is optional. Flags that are given override the matching
// key of the --config file, which in turn overrides the built-in defaults
// (see CrawlArgs::apply).
// =============================================================================

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{CacheLocation, CrawlConfig, CrawlStrategy, SourceKind, TransformLocation};
use crate::imaging::TransformKind;

#[derive(Parser, Debug)]
#[command(
    name = "image-crawler",
    version,
    about = "Crawl a website, download its images and apply image transforms",
    long_about = "image-crawler walks a website (or a local mirror of one) up to a maximum \
                  link depth, downloads every image it finds exactly once and applies each \
                  configured transform to it exactly once."
)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from a root page and transform every image found
    ///
    /// Example: image-crawler crawl https://example.com --max-depth 2 --transform grayscale
    Crawl(CrawlArgs),

    /// List the built-in transforms
    Transforms,
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Root URL to start from, or a directory when --local is given
    pub root: String,

    /// Number of link hops to follow from the root page
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// How sibling pages and images are scheduled
    #[arg(long, value_enum)]
    pub strategy: Option<CrawlStrategy>,

    /// Transform to apply (repeatable). Defaults to all built-ins.
    #[arg(long = "transform", value_enum)]
    pub transforms: Vec<TransformKind>,

    /// Treat ROOT as a directory holding a mirrored site
    #[arg(long)]
    pub local: bool,

    /// Send images to a transform service at this base URL
    #[arg(long, value_name = "URL")]
    pub remote_transforms: Option<String>,

    /// Keep downloads and transform results in this directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of concurrent branches and requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Follow links to other hosts as well
    #[arg(long)]
    pub all_hosts: bool,

    /// JSON file with crawl settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the crawl summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl CrawlArgs {
    // Layers the flags that were given on top of `config`
    pub fn apply(&self, mut config: CrawlConfig) -> CrawlConfig {
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if !self.transforms.is_empty() {
            config.transforms = self.transforms.clone();
        }
        if self.local {
            config.source = SourceKind::Local;
        }
        if let Some(url) = &self.remote_transforms {
            config.transform_location = TransformLocation::Remote;
            config.remote_transform_url = Some(url.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.cache = CacheLocation::Disk;
            config.cache_dir = Some(dir.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.all_hosts {
            config.stay_on_domain = false;
        }
        config
    }
}
