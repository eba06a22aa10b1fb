// src/cache/mod.rs
// =============================================================================
// Storage for downloaded and transformed images.
//
// Submodules:
// - memory: a concurrent map, discarded when the crawl ends
// - disk: one file per entry below a cache directory, kept between runs
//
// The image pipeline relies on exactly one guarantee from a store:
// put_if_absent is atomic. Two concurrent callers inserting the same key
// see exactly one `true`. That is what stops a transform from running twice
// for the same image.
// =============================================================================

mod disk;
mod memory;

use std::fmt;
use std::io;

use async_trait::async_trait;

pub use disk::DiskStore;
pub use memory::MemoryStore;

// Identifies one cached blob: a raw download, or a derived image produced by
// a named transform from that download
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: String,
    transform: Option<String>,
}

impl CacheKey {
    pub fn raw(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            transform: None,
        }
    }

    pub fn derived(source: impl Into<String>, transform: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            transform: Some(transform.into()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn transform(&self) -> Option<&str> {
        self.transform.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transform {
            Some(name) => write!(f, "{} [{}]", self.source, name),
            None => write!(f, "{}", self.source),
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> io::Result<Option<Vec<u8>>>;

    // Inserts only if the key is new. Returns true if this call inserted.
    async fn put_if_absent(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<bool>;

    // Overwrites the entry. Used to fill in an entry claimed by put_if_absent.
    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<()>;
}
