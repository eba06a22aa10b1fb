// src/testing.rs
// =============================================================================
// Test helpers shared by the unit tests of several modules.
//
// - MockSite: an in-memory website implementing PageFetcher. It records how
//   often every URL was fetched and how many requests were in flight at once.
// - CountingTransform: a Transform that counts its invocations.
// - png_bytes: a small encoded PNG for tests that need real image data.
// - FormField / service_reply: wiremock helpers for the transform service.
//
// Only compiled for `cargo test`.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use url::Url;
use wiremock::{Match, Request};

use crate::error::{FetchError, TransformError};
use crate::imaging::{Image, Transform};
use crate::page::{Page, PageFetcher};

// Encodes a w x h PNG filled with the colour (10, 20, 30)
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let pixels = RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(pixels)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Default)]
pub struct MockSite {
    pages: Mutex<HashMap<String, String>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    transient: Mutex<HashSet<String>>,
    unauthorized: Mutex<HashSet<String>>,
    fetches: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.latency = Duration::from_millis(ms);
        self
    }

    pub fn add_page(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }

    pub fn add_image(&self, url: &str) {
        self.add_blob(url, png_bytes(4, 4));
    }

    pub fn add_blob(&self, url: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn fail_transient(&self, url: &str) {
        self.transient.lock().unwrap().insert(url.to_string());
    }

    pub fn fail_unauthorized(&self, url: &str) {
        self.unauthorized.lock().unwrap().insert(url.to_string());
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    // Counts the request, simulates latency and applies configured failures
    async fn begin(&self, url: &str) -> Result<(), FetchError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unauthorized.lock().unwrap().contains(url) {
            return Err(FetchError::Unauthorized {
                url: url.to_string(),
                status: 403,
            });
        }
        if self.transient.lock().unwrap().contains(url) {
            return Err(FetchError::transient(url, "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for MockSite {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        self.begin(url).await?;

        let html = self.pages.lock().unwrap().get(url).cloned();
        let html = html.ok_or_else(|| FetchError::transient(url, "HTTP 404"))?;
        let parsed = Url::parse(url).map_err(|e| FetchError::transient(url, e))?;
        Ok(Page::parse(parsed, &html))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.begin(url).await?;

        let bytes = self.blobs.lock().unwrap().get(url).cloned();
        bytes.ok_or_else(|| FetchError::transient(url, "HTTP 404"))
    }
}

// A transform that returns its input unchanged (or fails) and counts calls
pub struct CountingTransform {
    name: String,
    fail: bool,
    pub calls: AtomicUsize,
}

impl CountingTransform {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transform for CountingTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, image: &Image) -> Result<Image, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransformError::Remote(format!("{} refused", self.name)));
        }
        Ok(image.derive(self.name.clone(), image.format(), image.bytes().to_vec()))
    }
}

// Matches a multipart request carrying the text field `name` = `value`.
// Compares raw bytes since the body also holds binary image data.
pub struct FormField {
    needle: Vec<u8>,
}

impl FormField {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            needle: format!("name=\"{name}\"\r\n\r\n{value}\r\n").into_bytes(),
        }
    }
}

impl Match for FormField {
    fn matches(&self, request: &Request) -> bool {
        request
            .body
            .windows(self.needle.len())
            .any(|window| window == self.needle.as_slice())
    }
}

// A transform service reply with one small PNG per name
pub fn service_reply(names: &[&str]) -> serde_json::Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(1, 1));
    names
        .iter()
        .map(|name| serde_json::json!({ "transformName": name, "image": encoded }))
        .collect()
}
