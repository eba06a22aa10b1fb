// src/imaging/mod.rs
// =============================================================================
// Images and the transforms applied to them.
//
// Submodules:
// - transform: the Transform trait and the built-in transforms
// - remote: client for a transform service that runs transforms for us
//
// An Image is identified by the URL it was downloaded from. Derived images
// keep that URL and additionally carry the name of the transform that
// produced them.
// =============================================================================

mod remote;
mod transform;

use image::ImageFormat;

pub use remote::RemoteTransformer;
pub use transform::{Transform, TransformKind};

#[derive(Debug, Clone)]
pub struct Image {
    source: String,
    transform: Option<String>,
    format: ImageFormat,
    bytes: Vec<u8>,
}

impl Image {
    // Wraps downloaded bytes, or returns None when they are not in an image
    // format we recognise (an HTML error page, a truncated file, ...).
    pub fn from_bytes(source: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        let format = image::guess_format(&bytes).ok()?;
        Some(Self {
            source: source.into(),
            transform: None,
            format,
            bytes,
        })
    }

    // Builds the output of `transform` applied to this image
    pub fn derive(&self, transform: impl Into<String>, format: ImageFormat, bytes: Vec<u8>) -> Self {
        Self {
            source: self.source.clone(),
            transform: Some(transform.into()),
            format,
            bytes,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn transform(&self) -> Option<&str> {
        self.transform.as_deref()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
