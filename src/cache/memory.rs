// src/cache/memory.rs
// In-memory cache store backed by a DashMap. Entries live as long as the
// crawl run that owns the store.

use std::io;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CacheKey, CacheStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_if_absent(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<bool> {
        // The entry API holds the shard lock across check and insert
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                Ok(true)
            }
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> io::Result<()> {
        self.entries.insert(key.clone(), bytes);
        Ok(())
    }
}
