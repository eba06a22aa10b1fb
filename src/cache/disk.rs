// src/cache/disk.rs
// =============================================================================
// Cache store that keeps every entry as a file, so downloads and transform
// results survive between crawl runs.
//
// Layout:
//   <cache dir>/_raw/<sha256 of source url>
//   <cache dir>/<escaped transform name>/<sha256 of source url>
//
// Every write goes to a uniquely named temporary file in the entry's
// directory first and is then published in one step:
// - put_if_absent hard-links the temporary file into place. The link fails
//   with AlreadyExists if the entry is there, so exactly one caller wins.
// - put renames the temporary file over the entry.
// Either way readers see the whole entry or none of it, also after a crash.
// =============================================================================

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CacheKey, CacheStore};

// Transform directories never start with '_' on their own (see escape_name),
// so this cannot collide with a transform
const RAW_DIR: &str = "_raw";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let dir = match key.transform() {
            Some(name) => escape_name(name),
            None => RAW_DIR.to_string(),
        };
        let file = format!("{:x}", Sha256::digest(key.source().as_bytes()));
        self.root.join(dir).join(file)
    }

    async fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    // Writes `bytes` to a fresh temporary file next to `path`
    async fn write_temp(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
        Self::ensure_parent(path).await?;
        let tmp = path.with_extension(format!(
            "{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, bytes).await?;
        Ok(tmp)
    }
}

// Turns a transform name into a directory name, one to one.
//
// Lowercase letters, digits and '-' are kept. Every other byte becomes '_'
// followed by two lowercase hex digits. The empty name becomes "_".
fn escape_name(name: &str) -> String {
    if name.is_empty() {
        return String::from("_");
    }

    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => escaped.push(byte as char),
            _ => escaped.push_str(&format!("_{byte:02x}")),
        }
    }
    escaped
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_if_absent(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<bool> {
        let path = self.path_for(key);
        let tmp = Self::write_temp(&path, &bytes).await?;

        let claimed = match tokio::fs::hard_link(&tmp, &path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), error = %e, "could not remove temporary file");
        }
        claimed
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<()> {
        let path = self.path_for(key);
        let tmp = Self::write_temp(&path, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}
