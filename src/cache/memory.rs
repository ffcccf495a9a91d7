//! In-process sequence cache
//!
//! Same contract as the Redis cache but scoped to one process; state is lost
//! on restart, which the sequencer tolerates (a cold cache reads as "no
//! pending transactions").

use super::SequenceCache;
use crate::error::CacheError;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemorySequenceCache {
    values: DashMap<String, String>,
    hashes: DashMap<String, HashMap<String, String>>,
}

impl MemorySequenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields stored under `map`
    pub fn hash_len(&self, map: &str) -> usize {
        self.hashes.get(map).map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SequenceCache for MemorySequenceCache {
    async fn get_int(&self, key: &str) -> Result<Option<u64>, CacheError> {
        match self.values.get(key) {
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CacheError::Malformed {
                    key: key.to_string(),
                    value: value.clone(),
                }),
            None => Ok(None),
        }
    }

    async fn set_int(&self, key: &str, value: u64) -> Result<(), CacheError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_hash_field(&self, map: &str, field: &str) -> Result<Option<String>, CacheError> {
        Ok(self.hashes.get(map).and_then(|h| h.get(field).cloned()))
    }

    async fn set_hash_field(&self, map: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.hashes
            .entry(map.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_hash_fields(&self, map: &str, fields: &[String]) -> Result<u64, CacheError> {
        let mut deleted = 0;
        if let Some(mut hash) = self.hashes.get_mut(map) {
            for field in fields {
                if hash.remove(field).is_some() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}
