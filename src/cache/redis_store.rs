//! Redis-backed sequence cache shared by every process of a deployment

use super::SequenceCache;
use crate::error::CacheError;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

pub struct RedisSequenceCache {
    conn: ConnectionManager,
}

impl RedisSequenceCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SequenceCache for RedisSequenceCache {
    async fn get_int(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CacheError::Malformed {
                    key: key.to_string(),
                    value,
                }),
            None => Ok(None),
        }
    }

    async fn set_int(&self, key: &str, value: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value.to_string()).await?;
        Ok(())
    }

    async fn get_hash_field(&self, map: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(map, field).await?)
    }

    async fn set_hash_field(&self, map: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(map, field, value).await?;
        Ok(())
    }

    async fn delete_hash_fields(&self, map: &str, fields: &[String]) -> Result<u64, CacheError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.hdel(map, fields).await?)
    }
}
