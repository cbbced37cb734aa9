//! Relabel result caches
//!
//! Relabel components memoize rule results per series. The cache is keyed by
//! the decimal global ref of the original series; the value type is chosen
//! by the caller.
//!
//! # Backends
//!
//! - **inmemory**: bounded LRU inside the process (default)
//! - **redis**: shared cache on a Redis server, values stored as JSON
//! - **memcached**: recognized in configuration, not available in this build
//!
//! # Example
//!
//! ```rust
//! use kuba_pipeline::cache::{new_cache, Cache, CacheConfig};
//!
//! let cache = new_cache::<String>(&CacheConfig::default()).unwrap();
//! cache.set("1", "relabeled".to_string(), None).unwrap();
//! assert_eq!(cache.get("1").unwrap(), Some("relabeled".to_string()));
//! ```

mod memory;
mod redis_backend;

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, ValidationError};

pub use memory::InMemoryCache;
pub use redis_backend::{sanitize_url, RedisCache};

/// Default number of entries of the in-memory cache
pub const DEFAULT_CACHE_SIZE: usize = 100_000;

/// Key/value cache used by relabel components
pub trait Cache<V>: Send + Sync {
    /// Look up `key`; `Ok(None)` is a miss
    fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl` when the backend
    /// supports it
    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove `key`
    fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry and resize to `new_size` entries
    ///
    /// Backends without a size bound ignore `new_size`.
    fn clear(&self, new_size: usize) -> Result<(), CacheError>;

    /// Number of entries, if the backend can tell cheaply
    fn len(&self) -> Option<usize>;
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local LRU
    #[default]
    InMemory,
    /// Memcached server
    Memcached,
    /// Redis server
    Redis,
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheBackend::InMemory => "inmemory",
            CacheBackend::Memcached => "memcached",
            CacheBackend::Redis => "redis",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inmemory" => Ok(CacheBackend::InMemory),
            "memcached" => Ok(CacheBackend::Memcached),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(ValidationError::InvalidFormat {
                field: "cache.backend".to_string(),
                message: format!(
                    "unknown cache backend {:?}, should be one of inmemory, memcached, redis",
                    other
                ),
            }),
        }
    }
}

/// In-memory cache settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

/// Redis cache settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RedisCacheConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry of cached entries in seconds (0 = never)
    #[serde(default)]
    pub ttl_secs: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: CacheBackend,

    /// Settings of the in-memory backend
    #[serde(default)]
    pub in_memory: InMemoryCacheConfig,

    /// Settings of the Redis backend
    #[serde(default)]
    pub redis: RedisCacheConfig,
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "kuba:relabel:".to_string()
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
        }
    }
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: 0,
        }
    }
}

impl CacheConfig {
    /// Check the settings of the selected backend
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.backend {
            CacheBackend::InMemory if self.in_memory.cache_size == 0 => {
                Err(ValidationError::OutOfRange {
                    field: "cache.in_memory.cache_size".to_string(),
                    value: "0".to_string(),
                    min: "1".to_string(),
                    max: usize::MAX.to_string(),
                })
            },
            CacheBackend::Redis if self.redis.url.is_empty() => Err(ValidationError::InvalidFormat {
                field: "cache.redis.url".to_string(),
                message: "must not be empty".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Build the cache selected by `config`
pub fn new_cache<V>(config: &CacheConfig) -> Result<Box<dyn Cache<V>>, CacheError>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match config.backend {
        CacheBackend::InMemory => Ok(Box::new(InMemoryCache::new(config.in_memory.cache_size)?)),
        CacheBackend::Redis => Ok(Box::new(RedisCache::new(&config.redis)?)),
        CacheBackend::Memcached => Err(CacheError::UnsupportedBackend(
            CacheBackend::Memcached.to_string(),
        )),
    }
}
