// src/page/local.rs
// =============================================================================
// Serves pages and images from a local mirror of a website.
//
// The mirror is a directory tree of HTML files and images. Pages are
// addressed with file:// URLs, so relative links inside the HTML resolve
// exactly like they would on a web server.
//
// Rules:
// - A URL pointing at a directory means that directory's index.html
// - Nothing outside the root directory is ever read
// - A missing root directory is a configuration error (the crawl cannot
//   start); a missing page or image is only a transient error
// =============================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use super::{Page, PageFetcher};
use crate::error::{CrawlError, FetchError};

const INDEX_FILE: &str = "index.html";

pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            CrawlError::Config(format!("local crawl root {}: {}", root.display(), e))
        })?;

        if !root.is_dir() {
            return Err(CrawlError::Config(format!(
                "local crawl root {} is not a directory",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    // The file:// URL of the root directory, used to seed the crawl
    pub fn root_url(&self) -> Result<Url, CrawlError> {
        Url::from_directory_path(&self.root).map_err(|_| {
            CrawlError::Config(format!("cannot build a URL for {}", self.root.display()))
        })
    }

    // Maps a file:// URL onto an existing path below the root.
    //
    // The path is canonicalized first, so `..` segments and symlinks that
    // lead out of the mirror are refused.
    async fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::transient(url, e))?;
        if parsed.scheme() != "file" {
            return Err(FetchError::transient(url, "not a file:// URL"));
        }

        let path = parsed
            .to_file_path()
            .map_err(|_| FetchError::transient(url, "URL has no local path"))?;
        let path = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| FetchError::transient(url, e))?;

        if !path.starts_with(&self.root) {
            return Err(FetchError::transient(url, "outside of the crawl root"));
        }

        Ok(path)
    }
}

#[async_trait]
impl PageFetcher for LocalFetcher {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let mut path = self.resolve(url).await?;
        if path.is_dir() {
            path.push(INDEX_FILE);
        }

        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::transient(url, e))?;

        let page_url = Url::from_file_path(&path)
            .map_err(|_| FetchError::transient(url, "URL has no local path"))?;

        Ok(Page::parse(page_url, &html))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(url).await?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::transient(url, e))
    }
}
