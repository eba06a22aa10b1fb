// src/imaging/remote.rs
// =============================================================================
// Client for a remote transform service.
//
// Instead of running transforms on this machine, the crawler can upload an
// image once and let a service apply several transforms to it:
//
//   POST <base url>/apply-transforms
//   multipart form:
//     image       the raw image bytes
//     transforms  comma separated transform names
//
//   200 OK
//   [ { "transformName": "grayscale", "image": "<base64 bytes>" }, ... ]
//
// The service may return fewer entries than requested (a transform it could
// not apply is simply missing from the reply).
// =============================================================================

use std::time::Duration;

use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::Image;
use crate::error::TransformError;

const ENDPOINT: &str = "apply-transforms";

// One entry of the service reply
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedImage {
    pub transform_name: String,
    /// Base64 encoded image bytes
    pub image: String,
}

impl TransformedImage {
    // Converts a reply entry into a derived image of `source`.
    // Entries whose payload is not valid base64 or not an image are dropped.
    pub fn into_image(self, source: &Image) -> Option<Image> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.image.as_bytes())
            .ok()?;
        let format = image::guess_format(&bytes).ok()?;
        Some(source.derive(self.transform_name, format, bytes))
    }
}

pub struct RemoteTransformer {
    client: Client,
    endpoint: Url,
}

impl RemoteTransformer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransformError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| TransformError::Remote(format!("invalid URL {base_url}: {e}")))?;

        // join() replaces the last path segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base
            .join(ENDPOINT)
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    // Uploads `image` and asks for every transform in `names`
    pub async fn apply(&self, image: &Image, names: &[String]) -> Result<Vec<Image>, TransformError> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name("image")
            .mime_str(image.format().to_mime_type())
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        let form = Form::new()
            .part("image", part)
            .text("transforms", names.join(","));

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransformError::Remote(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let reply: Vec<TransformedImage> = response
            .json()
            .await
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        Ok(reply
            .into_iter()
            .filter_map(|entry| entry.into_image(image))
            .collect())
    }
}
