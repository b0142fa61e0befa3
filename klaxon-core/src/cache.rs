//! Shared (L2) cache used by classification and the active-alert lookup.
//!
//! The trait keeps the pipeline testable without Redis; production wires in
//! [`RedisCache`], tests use [`InMemoryCache`]. Values are JSON strings so
//! the trait stays object-safe.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use klaxon_model::Fingerprint;

use crate::error::Result;

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed helpers over the string-valued trait.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn SharedCache,
    key: &str,
) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(json) => {
            debug!("cache HIT: {}", key);
            Ok(Some(serde_json::from_str(&json)?))
        }
        None => {
            debug!("cache MISS: {}", key);
            Ok(None)
        }
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn SharedCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    cache.set(key, json, ttl).await
}

/// Key namespace shared by every cache consumer.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn classification(fingerprint: Fingerprint) -> String {
        format!("classify:v1:{}", fingerprint.as_hex())
    }

    pub fn firing_alert(fingerprint: Fingerprint) -> String {
        format!("alert:firing:v1:{}", fingerprint.as_hex())
    }

    pub fn firing_alert_pattern() -> String {
        "alert:firing:v1:*".to_string()
    }
}

#[cfg(feature = "database")]
pub use redis_impl::RedisCache;

#[cfg(feature = "database")]
mod redis_impl {
    use super::*;
    use crate::error::AlertError;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;
    use std::fmt;
    use tracing::info;

    /// Redis-backed shared cache.
    #[derive(Clone)]
    pub struct RedisCache {
        conn: ConnectionManager,
    }

    impl fmt::Debug for RedisCache {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisCache")
                .field("connection", &"ConnectionManager")
                .finish()
        }
    }

    impl RedisCache {
        pub async fn new(redis_url: &str) -> Result<Self> {
            info!("Connecting to Redis cache at {}", redis_url);

            let client = redis::Client::open(redis_url).map_err(|e| {
                AlertError::Internal(format!("Failed to create Redis client: {e}"))
            })?;

            let conn = ConnectionManager::new(client)
                .await
                .map_err(|e| AlertError::Internal(format!("Failed to connect to Redis: {e}")))?;

            info!("Successfully connected to Redis cache");

            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl SharedCache for RedisCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut conn = self.conn.clone();
            let data: Option<String> = conn.get(key).await?;
            Ok(data)
        }

        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
            let mut conn = self.conn.clone();
            if let Some(ttl) = ttl {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
            } else {
                conn.set::<_, _, ()>(key, value).await?;
            }
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(key).await?;
            Ok(())
        }
    }
}

/// Process-local stand-in used by tests and degraded boots.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: tokio::sync::RwLock<
        std::collections::HashMap<String, (String, Option<tokio::time::Instant>)>,
    >,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = tokio::time::Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expires_at)| {
            match expires_at {
                Some(deadline) if *deadline <= now => None,
                _ => Some(value.clone()),
            }
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| tokio::time::Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
