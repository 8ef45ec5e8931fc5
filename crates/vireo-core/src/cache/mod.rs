//! Durable key-value cache with per-entry TTL.
//!
//! Two namespaces are used by the pipeline: `search` for catalog results,
//! keyed by `(adapter_id, normalized_query)`, and `inventory` for local
//! scan indices, keyed by the absolute root path.

mod sqlite;

pub use sqlite::SqliteCache;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Namespace for catalog search results.
pub const NS_SEARCH: &str = "search";
/// Namespace for local inventory indices.
pub const NS_INVENTORY: &str = "inventory";

/// Statistics for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Cache statistics across all namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub namespaces: Vec<NamespaceStats>,
}

/// Namespace-isolated key-value storage with TTL.
///
/// Operations are synchronous to match rusqlite; callers hold the lock only
/// for the duration of a single get/set.
pub trait CacheBackend: Send + Sync {
    /// Get a value. Returns `None` when the key is absent or its age has
    /// reached the stored TTL.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with a TTL, replacing any existing entry.
    fn set(&self, namespace: &str, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete one entry. Returns whether it existed.
    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Clear one namespace, or everything. Returns entries removed.
    fn clear(&self, namespace: Option<&str>) -> Result<usize>;

    /// Remove expired entries from all namespaces. Returns entries removed.
    fn cleanup_expired(&self) -> Result<usize>;

    /// Aggregate statistics.
    fn stats(&self) -> Result<CacheStats>;
}

/// Get and deserialize a JSON value.
pub fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    namespace: &str,
    key: &str,
) -> Result<Option<T>> {
    match cache.get(namespace, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value.
pub fn set_json<T: Serialize>(
    cache: &dyn CacheBackend,
    namespace: &str,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    cache.set(namespace, key, &bytes, ttl)
}
