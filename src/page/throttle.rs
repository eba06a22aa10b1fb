// src/page/throttle.rs
// Wraps another PageFetcher and caps the number of requests in flight.
// Every branch of the crawl shares one Throttled fetcher, so however many
// tasks are spawned the source never sees more than `limit` requests at once.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{Page, PageFetcher};
use crate::error::FetchError;

pub struct Throttled {
    inner: Arc<dyn PageFetcher>,
    permits: Semaphore,
}

impl Throttled {
    pub fn new(inner: Arc<dyn PageFetcher>, limit: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limit.max(1)),
        }
    }
}

#[async_trait]
impl PageFetcher for Throttled {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        // The semaphore is never closed, so acquire only fails in theory
        let _permit = self.permits.acquire().await.ok();
        self.inner.fetch_page(url).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let _permit = self.permits.acquire().await.ok();
        self.inner.fetch_bytes(url).await
    }
}
