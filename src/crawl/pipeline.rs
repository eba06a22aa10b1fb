// src/crawl/pipeline.rs
// =============================================================================
// The image pipeline: download every image once, transform it once per
// transform, and keep the results in the cache store.
//
// Flow for one image URL found on a page:
//
//   url --download_image--> Option<Arc<Image>> --transform_image--> Vec<Arc<Image>>
//
// Deduplication happens at two levels:
// 1. Downloads: one OnceCell per URL. Concurrent callers for the same URL all
//    wait on the same download and get the same Arc<Image> back.
// 2. Transforms: before running a transform the pipeline claims the
//    (image, transform) key with put_if_absent. Only the caller that inserted
//    the key runs the transform; everyone else skips it.
//
// Nothing in here fails a crawl except a broken cache store or a panicking
// transform task. Images that cannot be downloaded, are not images, or that
// a transform cannot handle are logged and dropped.
// =============================================================================

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::strategy::fan_out;
use crate::cache::{CacheKey, CacheStore};
use crate::config::CrawlStrategy;
use crate::error::CrawlError;
use crate::imaging::{Image, RemoteTransformer, Transform};
use crate::page::PageFetcher;

type DownloadSlot = Arc<OnceCell<Option<Arc<Image>>>>;

pub struct ImagePipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CacheStore>,
    transforms: Vec<Arc<dyn Transform>>,
    remote: Option<Arc<RemoteTransformer>>,
    downloads: DashMap<String, DownloadSlot>,
    strategy: CrawlStrategy,
    concurrency: usize,
}

impl ImagePipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CacheStore>,
        transforms: Vec<Arc<dyn Transform>>,
        strategy: CrawlStrategy,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            store,
            transforms,
            remote: None,
            downloads: DashMap::new(),
            strategy,
            concurrency,
        }
    }

    // Sends transforms to a transform service instead of running them here
    pub fn with_remote(mut self, remote: Arc<RemoteTransformer>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn transform_names(&self) -> Vec<String> {
        self.transforms.iter().map(|t| t.name().to_string()).collect()
    }

    // Downloads, transforms and caches every image URL of one page
    pub async fn images_on_page(
        self: Arc<Self>,
        urls: Vec<String>,
    ) -> Result<Vec<Arc<Image>>, CrawlError> {
        let pipeline = self.clone();
        fan_out(self.strategy, self.concurrency, urls, move |url| {
            pipeline.clone().process_image(url)
        })
        .await
    }

    async fn process_image(self: Arc<Self>, url: String) -> Result<Vec<Arc<Image>>, CrawlError> {
        let image = match self.download_image(&url).await {
            Ok(Some(image)) => image,
            Ok(None) => return Ok(Vec::new()),
            // A broken image never stops the crawl, whatever the reason
            Err(CrawlError::Fetch(e)) => {
                warn!(url = %url, error = %e, "skipping image");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        self.transform_image(image).await
    }

    // Returns the image at `url`, downloading it on first use.
    //
    // Ok(None) means the URL does not point at something we can decode.
    // That outcome is cached too, so the URL is not fetched again.
    pub async fn download_image(&self, url: &str) -> Result<Option<Arc<Image>>, CrawlError> {
        // Clone the slot out so the map shard is not locked while we await
        let slot = self.downloads.entry(url.to_string()).or_default().clone();
        let image = slot.get_or_try_init(|| self.load_image(url)).await?;
        Ok(image.clone())
    }

    async fn load_image(&self, url: &str) -> Result<Option<Arc<Image>>, CrawlError> {
        let key = CacheKey::raw(url);

        if let Some(bytes) = self.store.get(&key).await? {
            debug!(url, "image found in cache");
            return Ok(Image::from_bytes(url, bytes).map(Arc::new));
        }

        let bytes = self.fetcher.fetch_bytes(url).await?;
        match Image::from_bytes(url, bytes) {
            Some(image) => {
                self.store.put_if_absent(&key, image.bytes().to_vec()).await?;
                debug!(url, format = ?image.format(), "downloaded image");
                Ok(Some(Arc::new(image)))
            }
            None => {
                debug!(url, "not a supported image, ignoring");
                Ok(None)
            }
        }
    }

    // Applies every configured transform that has not been applied to
    // `image` yet and returns the images that were produced
    pub async fn transform_image(
        self: Arc<Self>,
        image: Arc<Image>,
    ) -> Result<Vec<Arc<Image>>, CrawlError> {
        if let Some(remote) = self.remote.clone() {
            return self.transform_remotely(&remote, image).await;
        }

        // Jobs take a position so the closure only captures owned values
        let pipeline = self.clone();
        let positions: Vec<usize> = (0..self.transforms.len()).collect();
        fan_out(self.strategy, self.concurrency, positions, move |index| {
            pipeline.clone().apply_transform(index, image.clone())
        })
        .await
    }

    async fn apply_transform(
        self: Arc<Self>,
        index: usize,
        image: Arc<Image>,
    ) -> Result<Vec<Arc<Image>>, CrawlError> {
        let transform = self.transforms[index].clone();
        let key = CacheKey::derived(image.source(), transform.name());
        if !self.store.put_if_absent(&key, Vec::new()).await? {
            debug!(%key, "already transformed, skipping");
            return Ok(Vec::new());
        }

        // Transforms are CPU bound; keep them off the async worker threads
        let name = transform.name().to_string();
        let result = tokio::task::spawn_blocking(move || transform.apply(&image)).await?;

        match result {
            Ok(derived) => {
                self.store.put(&key, derived.bytes().to_vec()).await?;
                Ok(vec![Arc::new(derived)])
            }
            Err(e) => {
                debug!(transform = %name, error = %e, "transform produced no image");
                Ok(Vec::new())
            }
        }
    }

    async fn transform_remotely(
        &self,
        remote: &RemoteTransformer,
        image: Arc<Image>,
    ) -> Result<Vec<Arc<Image>>, CrawlError> {
        let mut claimed = Vec::new();
        for name in self.transform_names() {
            let key = CacheKey::derived(image.source(), name.as_str());
            if self.store.put_if_absent(&key, Vec::new()).await? {
                claimed.push(name);
            }
        }

        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let derived = match remote.apply(&image, &claimed).await {
            Ok(derived) => derived,
            Err(e) => {
                warn!(url = %image.source(), error = %e, "remote transforms failed");
                return Ok(Vec::new());
            }
        };

        let mut produced = Vec::with_capacity(derived.len());
        for output in derived {
            // Each claim is consumed by the first matching entry. Repeats and
            // names we did not ask for are dropped.
            let position = output
                .transform()
                .and_then(|name| claimed.iter().position(|c| c == name));
            let Some(position) = position else {
                debug!(url = %image.source(), transform = ?output.transform(), "ignoring reply entry");
                continue;
            };
            let name = claimed.swap_remove(position);

            let key = CacheKey::derived(image.source(), name);
            self.store.put(&key, output.bytes().to_vec()).await?;
            produced.push(Arc::new(output));
        }

        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::testing::{CountingTransform, MockSite};

    const IMG: &str = "http://site.test/cat.png";

    fn pipeline(
        site: Arc<MockSite>,
        store: Arc<MemoryStore>,
        transforms: Vec<Arc<dyn Transform>>,
    ) -> Arc<ImagePipeline> {
        Arc::new(ImagePipeline::new(
            site,
            store,
            transforms,
            CrawlStrategy::Concurrent,
            8,
        ))
    }

    #[tokio::test]
    async fn test_download_twice_returns_same_image() {
        let site = Arc::new(MockSite::new());
        site.add_image(IMG);
        let pipeline = pipeline(site.clone(), Arc::new(MemoryStore::new()), Vec::new());

        let first = pipeline.download_image(IMG).await.unwrap().unwrap();
        let second = pipeline.download_image(IMG).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(site.fetch_count(IMG), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_downloads_fetch_once() {
        let site = Arc::new(MockSite::new().with_latency_ms(20));
        site.add_image(IMG);
        let pipeline = pipeline(site.clone(), Arc::new(MemoryStore::new()), Vec::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.download_image(IMG).await.unwrap().unwrap()
            }));
        }

        let mut images = Vec::new();
        for handle in handles {
            images.push(handle.await.unwrap());
        }

        assert!(images.iter().all(|img| Arc::ptr_eq(img, &images[0])));
        assert_eq!(site.fetch_count(IMG), 1);
    }

    #[tokio::test]
    async fn test_non_image_is_absent_not_error() {
        let site = Arc::new(MockSite::new());
        site.add_blob(IMG, b"<html>not found</html>".to_vec());
        let pipeline = pipeline(site.clone(), Arc::new(MemoryStore::new()), Vec::new());

        assert!(pipeline.download_image(IMG).await.unwrap().is_none());
        // the absent result is remembered as well
        assert!(pipeline.download_image(IMG).await.unwrap().is_none());
        assert_eq!(site.fetch_count(IMG), 1);
    }

    #[tokio::test]
    async fn test_cached_raw_bytes_skip_the_fetch() {
        let site = Arc::new(MockSite::new());
        let store = Arc::new(MemoryStore::new());
        store
            .put(&CacheKey::raw(IMG), crate::testing::png_bytes(2, 2))
            .await
            .unwrap();
        let pipeline = pipeline(site.clone(), store, Vec::new());

        assert!(pipeline.download_image(IMG).await.unwrap().is_some());
        assert_eq!(site.total_fetches(), 0);
    }

    #[tokio::test]
    async fn test_pre_claimed_transform_is_skipped() {
        let site = Arc::new(MockSite::new());
        site.add_image(IMG);
        let store = Arc::new(MemoryStore::new());
        store
            .put_if_absent(&CacheKey::derived(IMG, "b"), Vec::new())
            .await
            .unwrap();

        let a = Arc::new(CountingTransform::new("a"));
        let b = Arc::new(CountingTransform::new("b"));
        let c = Arc::new(CountingTransform::new("c"));
        let transforms: Vec<Arc<dyn Transform>> = vec![a.clone(), b.clone(), c.clone()];
        let pipeline = pipeline(site, store, transforms);

        let image = pipeline.download_image(IMG).await.unwrap().unwrap();
        let produced = pipeline.clone().transform_image(image).await.unwrap();

        assert_eq!(produced.len(), 2);
        assert_eq!(a.calls() + b.calls() + c.calls(), 2);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transform_runs_once() {
        let site = Arc::new(MockSite::new());
        site.add_image(IMG);
        let gray = Arc::new(CountingTransform::new("gray"));
        let transforms: Vec<Arc<dyn Transform>> = vec![gray.clone()];
        let pipeline = pipeline(site, Arc::new(MemoryStore::new()), transforms);
        let image = pipeline.download_image(IMG).await.unwrap().unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pipeline = pipeline.clone();
            let image = image.clone();
            handles.push(tokio::spawn(async move {
                pipeline.transform_image(image).await.unwrap().len()
            }));
        }

        let mut produced = 0;
        for handle in handles {
            produced += handle.await.unwrap();
        }

        assert_eq!(produced, 1);
        assert_eq!(gray.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_transform_is_filtered() {
        let site = Arc::new(MockSite::new());
        site.add_image(IMG);
        let ok = Arc::new(CountingTransform::new("ok"));
        let broken = Arc::new(CountingTransform::failing("broken"));
        let transforms: Vec<Arc<dyn Transform>> = vec![ok.clone(), broken.clone()];
        let pipeline = pipeline(site, Arc::new(MemoryStore::new()), transforms);

        let produced = pipeline
            .images_on_page(vec![IMG.to_string()])
            .await
            .unwrap();

        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].transform(), Some("ok"));
        assert_eq!(broken.calls(), 1);
    }

    #[tokio::test]
    async fn test_page_images_filter_missing_and_unsupported() {
        let site = Arc::new(MockSite::new());
        site.add_image("http://site.test/1.png");
        site.add_blob("http://site.test/2.png", b"plain text".to_vec());
        site.add_image("http://site.test/3.png");
        site.fail_transient("http://site.test/4.png");

        let identity = Arc::new(CountingTransform::new("identity"));
        let transforms: Vec<Arc<dyn Transform>> = vec![identity.clone()];
        let pipeline = pipeline(site, Arc::new(MemoryStore::new()), transforms);

        let urls = (1..=4).map(|i| format!("http://site.test/{i}.png")).collect();
        let produced = pipeline.images_on_page(urls).await.unwrap();

        assert_eq!(produced.len(), 2);
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test]
    async fn test_outputs_are_stored() {
        let site = Arc::new(MockSite::new());
        site.add_image(IMG);
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(
            site,
            store.clone(),
            vec![crate::imaging::TransformKind::Grayscale.build()],
        );

        pipeline.images_on_page(vec![IMG.to_string()]).await.unwrap();

        let stored = store
            .get(&CacheKey::derived(IMG, "grayscale"))
            .await
            .unwrap()
            .unwrap();
        assert!(image::load_from_memory(&stored).is_ok());
        assert!(store.get(&CacheKey::raw(IMG)).await.unwrap().is_some());
    }

    mod remote {
        use std::time::Duration;

        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use super::*;
        use crate::testing::{service_reply, FormField};

        fn remote_pipeline(
            server: &MockServer,
            site: Arc<MockSite>,
            store: Arc<MemoryStore>,
            names: &[&str],
        ) -> Arc<ImagePipeline> {
            let transforms: Vec<Arc<dyn Transform>> = names
                .iter()
                .map(|name| Arc::new(CountingTransform::new(name)) as Arc<dyn Transform>)
                .collect();
            let remote = RemoteTransformer::new(&server.uri(), Duration::from_secs(5)).unwrap();
            Arc::new(
                ImagePipeline::new(site, store, transforms, CrawlStrategy::Concurrent, 4)
                    .with_remote(Arc::new(remote)),
            )
        }

        #[tokio::test]
        async fn test_repeated_reply_entry_counts_once() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/apply-transforms"))
                .respond_with(ResponseTemplate::new(200).set_body_json(service_reply(&["a", "a"])))
                .expect(1)
                .mount(&server)
                .await;

            let site = Arc::new(MockSite::new());
            site.add_image(IMG);
            let pipeline = remote_pipeline(&server, site, Arc::new(MemoryStore::new()), &["a"]);

            let produced = pipeline
                .images_on_page(vec![IMG.to_string()])
                .await
                .unwrap();

            assert_eq!(produced.len(), 1);
            assert_eq!(produced[0].transform(), Some("a"));
        }

        #[tokio::test]
        async fn test_only_unclaimed_transforms_are_requested() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/apply-transforms"))
                .and(FormField::new("transforms", "a,c"))
                // "b" was not asked for and must not be stored
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(service_reply(&["a", "b", "c"])),
                )
                .expect(1)
                .mount(&server)
                .await;

            let site = Arc::new(MockSite::new());
            site.add_image(IMG);
            let store = Arc::new(MemoryStore::new());
            store
                .put_if_absent(&CacheKey::derived(IMG, "b"), Vec::new())
                .await
                .unwrap();
            let pipeline = remote_pipeline(&server, site, store.clone(), &["a", "b", "c"]);

            let produced = pipeline
                .images_on_page(vec![IMG.to_string()])
                .await
                .unwrap();

            let mut names: Vec<_> = produced.iter().filter_map(|i| i.transform()).collect();
            names.sort();
            assert_eq!(names, vec!["a", "c"]);
            let placeholder = store.get(&CacheKey::derived(IMG, "b")).await.unwrap();
            assert_eq!(placeholder, Some(Vec::new()));
        }

        #[tokio::test]
        async fn test_failed_service_call_keeps_claims() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/apply-transforms"))
                .respond_with(ResponseTemplate::new(500))
                .expect(1)
                .mount(&server)
                .await;

            let site = Arc::new(MockSite::new());
            site.add_image(IMG);
            let pipeline = remote_pipeline(&server, site, Arc::new(MemoryStore::new()), &["a"]);
            let image = pipeline.download_image(IMG).await.unwrap().unwrap();

            let first = pipeline.clone().transform_image(image.clone()).await.unwrap();
            let second = pipeline.clone().transform_image(image).await.unwrap();

            assert!(first.is_empty());
            // the claim is kept, so the service is not called again
            assert!(second.is_empty());
        }
    }
}
