//! Shared sequence cache
//!
//! Holds the shadow nonce and the nonce -> transaction hash ledger of
//! in-flight transactions. The cache engine is pluggable: Redis for shared
//! deployments, an in-process map for single-process development.

pub mod memory;
pub mod redis_store;

pub use self::memory::MemorySequenceCache;
pub use self::redis_store::RedisSequenceCache;

use crate::config::CacheConfig;
use crate::error::{CacheError, OperatorResult};

use async_trait::async_trait;
use ethers::types::H256;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

/// Key-value operations the dispatcher needs from its cache engine
#[async_trait]
pub trait SequenceCache: Send + Sync {
    async fn get_int(&self, key: &str) -> Result<Option<u64>, CacheError>;

    async fn set_int(&self, key: &str, value: u64) -> Result<(), CacheError>;

    async fn get_hash_field(&self, map: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn set_hash_field(&self, map: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Returns the number of fields that existed
    async fn delete_hash_fields(&self, map: &str, fields: &[String]) -> Result<u64, CacheError>;
}

/// Build the cache engine selected by configuration
pub async fn connect(config: &CacheConfig) -> OperatorResult<Arc<dyn SequenceCache>> {
    if config.is_memory() {
        info!("Using in-process sequence cache");
        return Ok(Arc::new(MemorySequenceCache::new()));
    }

    let cache = RedisSequenceCache::connect(&config.url).await?;
    info!("Connected to sequence cache");
    Ok(Arc::new(cache))
}

/// Typed view of the shadow nonce and pending-entry map
#[derive(Clone)]
pub struct ShadowLedger {
    cache: Arc<dyn SequenceCache>,
    nonce_key: String,
    hashmap_key: String,
}

impl ShadowLedger {
    pub fn new(cache: Arc<dyn SequenceCache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            nonce_key: config.nonce_key.clone(),
            hashmap_key: config.hashmap_key.clone(),
        }
    }

    /// Last reserved nonce, `None` when the cache is cold
    pub async fn shadow_nonce(&self) -> Result<Option<u64>, CacheError> {
        self.cache.get_int(&self.nonce_key).await
    }

    pub async fn set_shadow_nonce(&self, nonce: u64) -> Result<(), CacheError> {
        match self.cache.set_int(&self.nonce_key, nonce).await {
            Ok(()) => {
                info!("Saved: {}={}", self.nonce_key, nonce);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save {}={} because of {}", self.nonce_key, nonce, e);
                Err(e)
            }
        }
    }

    pub async fn pending_hash(&self, nonce: u64) -> Result<Option<H256>, CacheError> {
        let field = nonce.to_string();
        match self.cache.get_hash_field(&self.hashmap_key, &field).await? {
            Some(raw) => H256::from_str(&raw)
                .map(Some)
                .map_err(|_| CacheError::Malformed {
                    key: format!("{}[{}]", self.hashmap_key, field),
                    value: raw,
                }),
            None => Ok(None),
        }
    }

    pub async fn has_pending(&self, nonce: u64) -> Result<bool, CacheError> {
        Ok(self
            .cache
            .get_hash_field(&self.hashmap_key, &nonce.to_string())
            .await?
            .is_some())
    }

    pub async fn record_pending(&self, nonce: u64, hash: H256) -> Result<(), CacheError> {
        self.cache
            .set_hash_field(&self.hashmap_key, &nonce.to_string(), &format!("{:?}", hash))
            .await
    }

    /// Delete pending entries for every nonce in `from..=to`
    pub async fn delete_pending_range(&self, from: u64, to: u64) -> Result<u64, CacheError> {
        if from > to {
            return Ok(0);
        }
        let fields: Vec<String> = (from..=to).map(|n| n.to_string()).collect();
        self.cache.delete_hash_fields(&self.hashmap_key, &fields).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (Arc<MemorySequenceCache>, ShadowLedger) {
        let cache = Arc::new(MemorySequenceCache::new());
        let config = CacheConfig {
            url: "memory://".to_string(),
            nonce_key: "nonce".to_string(),
            hashmap_key: "pending".to_string(),
            cleanup_interval: 10,
        };
        (cache.clone(), ShadowLedger::new(cache, &config))
    }

    #[tokio::test]
    async fn test_cold_cache_has_no_shadow_nonce() {
        let (_, ledger) = ledger();
        assert_eq!(ledger.shadow_nonce().await.unwrap(), None);
        ledger.set_shadow_nonce(7).await.unwrap();
        assert_eq!(ledger.shadow_nonce().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_pending_hash_round_trips_through_text() {
        let (cache, ledger) = ledger();
        let hash = H256::repeat_byte(0xab);
        ledger.record_pending(11, hash).await.unwrap();

        assert_eq!(ledger.pending_hash(11).await.unwrap(), Some(hash));
        assert_eq!(
            cache.get_hash_field("pending", "11").await.unwrap(),
            Some(format!("{:?}", hash))
        );
        assert!(ledger.pending_hash(12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_pending_hash_is_reported() {
        let (cache, ledger) = ledger();
        cache.set_hash_field("pending", "3", "not-a-hash").await.unwrap();
        assert!(matches!(
            ledger.pending_hash(3).await,
            Err(CacheError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_range_is_inclusive() {
        let (cache, ledger) = ledger();
        for n in 0..5 {
            ledger.record_pending(n, H256::from_low_u64_be(n)).await.unwrap();
        }
        assert_eq!(ledger.delete_pending_range(1, 3).await.unwrap(), 3);
        assert_eq!(cache.hash_len("pending"), 2);
        assert!(ledger.has_pending(0).await.unwrap());
        assert!(ledger.has_pending(4).await.unwrap());
        assert_eq!(ledger.delete_pending_range(4, 3).await.unwrap(), 0);
    }
}
