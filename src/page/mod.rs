// src/page/mod.rs
// =============================================================================
// Pages and the sources they come from.
//
// Submodules:
// - html: extracts page links and image sources from HTML
// - web: fetches pages and images over HTTP(S)
// - local: serves pages and images from a directory on disk
// - throttle: caps how many requests are in flight at once
//
// The crawl core only talks to the PageFetcher trait, so it does not care
// whether the site lives on a web server or in a local mirror.
// =============================================================================

mod html;
mod local;
mod throttle;
mod web;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;

pub use local::LocalFetcher;
pub use throttle::Throttled;
pub use web::WebFetcher;

// The two kinds of elements a page exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// <a href> links to other pages
    PageLink,
    /// <img src> images
    Image,
}

// An immutable, already-parsed page.
//
// Parsing happens once in Page::parse; afterwards the page is just two lists
// of absolute URLs, which keeps it cheap to move between tasks.
#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    links: Vec<String>,
    images: Vec<String>,
}

impl Page {
    pub fn parse(url: Url, html: &str) -> Self {
        let found = html::extract_elements(html, &url);
        Self {
            url,
            links: found.links,
            images: found.images,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn elements_as_strings(&self, kind: ElementKind) -> Vec<String> {
        match kind {
            ElementKind::PageLink => self.links.clone(),
            ElementKind::Image => self.images.clone(),
        }
    }

    // Extraction already produced absolute URLs, so nothing is dropped here
    // in practice; anything unparsable is skipped rather than failing the page.
    pub fn elements_as_urls(&self, kind: ElementKind) -> Vec<Url> {
        self.elements_as_strings(kind)
            .iter()
            .filter_map(|s| Url::parse(s).ok())
            .collect()
    }
}

// Where pages and image bytes come from
#[async_trait]
pub trait PageFetcher: Send + Sync {
    // Loads and parses the page at `url`
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError>;

    // Loads the raw bytes at `url` (used for images)
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}
