//! In-memory data store with thread-safe access
//!
//! Two independent tables, flat strings and field maps, each behind its own
//! reader/writer lock. Writers hold the table lock for the whole mutation, so
//! writes to different keys of one table still serialize.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Trait defining the interface for key-value storage operations
pub trait Store: Send + Sync {
    /// Upsert a string key
    async fn set(&self, key: Bytes, value: Bytes);

    /// Get a string value by key
    async fn get(&self, key: &[u8]) -> Option<Bytes>;

    /// Remove keys from both namespaces, returning how many existed
    async fn delete(&self, keys: &[Bytes]) -> usize;

    /// Upsert field/value pairs of a hash, creating it if absent
    async fn hset(&self, key: Bytes, fields: Vec<(Bytes, Bytes)>);

    /// Get a single hash field
    async fn hget(&self, key: &[u8], field: &[u8]) -> Option<Bytes>;

    /// Get every field/value pair of a hash, `None` if the hash was never written
    async fn hgetall(&self, key: &[u8]) -> Option<Vec<(Bytes, Bytes)>>;

    /// Number of string keys
    async fn len(&self) -> usize;

    /// Number of hash keys
    async fn hash_len(&self) -> usize;
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    strings: RwLock<HashMap<Bytes, Bytes>>,
    hashes: RwLock<HashMap<Bytes, HashMap<Bytes, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn set(&self, key: Bytes, value: Bytes) {
        let mut strings = self.strings.write().await;
        strings.insert(key, value);
    }

    async fn get(&self, key: &[u8]) -> Option<Bytes> {
        let strings = self.strings.read().await;
        strings.get(key).cloned()
    }

    async fn delete(&self, keys: &[Bytes]) -> usize {
        let mut removed = vec![false; keys.len()];

        {
            let mut strings = self.strings.write().await;
            for (key, hit) in keys.iter().zip(removed.iter_mut()) {
                *hit |= strings.remove(key).is_some();
            }
        }

        {
            let mut hashes = self.hashes.write().await;
            for (key, hit) in keys.iter().zip(removed.iter_mut()) {
                *hit |= hashes.remove(key).is_some();
            }
        }

        removed.into_iter().filter(|hit| *hit).count()
    }

    async fn hset(&self, key: Bytes, fields: Vec<(Bytes, Bytes)>) {
        let mut hashes = self.hashes.write().await;
        hashes.entry(key).or_default().extend(fields);
    }

    async fn hget(&self, key: &[u8], field: &[u8]) -> Option<Bytes> {
        let hashes = self.hashes.read().await;
        hashes.get(key).and_then(|hash| hash.get(field)).cloned()
    }

    async fn hgetall(&self, key: &[u8]) -> Option<Vec<(Bytes, Bytes)>> {
        let hashes = self.hashes.read().await;
        hashes.get(key).map(|hash| {
            hash.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
    }

    async fn len(&self) -> usize {
        self.strings.read().await.len()
    }

    async fn hash_len(&self) -> usize {
        self.hashes.read().await.len()
    }
}
