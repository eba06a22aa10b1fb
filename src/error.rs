// src/error.rs
// =============================================================================
// Error types for the crawl core.
//
// Errors fall into two groups:
// - Recoverable: a single page or image could not be fetched, or a transform
//   could not process an image. The crawl keeps going with fewer images.
// - Fatal: the crawl source refused us (401/403), the configuration is
//   invalid, the cache store broke or a worker task panicked. These abort the
//   whole crawl and surface to the caller.
//
// Rust concepts:
// - thiserror: derives std::error::Error and Display from attributes
// - #[from]: lets the ? operator convert one error type into another
// =============================================================================

use thiserror::Error;

// Errors produced by a PageFetcher when loading a page or raw bytes
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, non-success status, missing file, ...
    /// Only this one URL is affected.
    #[error("failed to fetch {url}: {reason}")]
    Transient { url: String, reason: String },

    /// The source rejected our credentials. Retrying other URLs is pointless.
    #[error("access to {url} was refused (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    /// The resource exists but is not something we can parse as a page
    #[error("{url} is not an HTML page (content type: {content_type})")]
    Unsupported { url: String, content_type: String },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Transient {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }
}

// Errors produced when a transform cannot turn an image into a derived image
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("could not decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("could not encode {transform} output: {source}")]
    Encode {
        transform: String,
        #[source]
        source: image::ImageError,
    },

    #[error("remote transform service failed: {0}")]
    Remote(String),
}

// Top level error returned by a crawl run
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("cache store failure: {0}")]
    Cache(#[from] std::io::Error),

    #[error("crawl task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CrawlError {
    // Only transient fetch errors are recoverable at a branch boundary
    pub fn is_fatal(&self) -> bool {
        match self {
            CrawlError::Fetch(e) => e.is_fatal(),
            _ => true,
        }
    }
}
