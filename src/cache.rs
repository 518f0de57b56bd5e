//! Keyed byte-string cache backing account keys and certificate bundles.
//!
//! Mirrors the two-variant cache used for ACME state: an in-memory map for
//! ephemeral operation, or a directory of one-file-per-key on disk. Writes
//! are best-effort; callers degrade to in-memory-only on I/O failure rather
//! than propagate it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::logging::ErrorLogger;

pub enum Cache {
  Memory(Arc<RwLock<HashMap<String, Vec<u8>>>>),
  File(PathBuf),
}

impl Cache {
  pub fn memory() -> Self {
    Cache::Memory(Arc::new(RwLock::new(HashMap::new())))
  }

  pub fn file(root: PathBuf) -> Self {
    Cache::File(root)
  }

  /// Fetches `key`, treating any I/O failure as a cache miss.
  pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
    match self {
      Cache::Memory(map) => map.read().await.get(key).cloned(),
      Cache::File(root) => tokio::fs::read(root.join(key)).await.ok(),
    }
  }

  /// Stores `value` under `key`. Failures are logged and swallowed; the
  /// in-memory copy of whatever called this remains authoritative.
  pub async fn set(&self, key: &str, value: Vec<u8>, logger: &ErrorLogger) {
    match self {
      Cache::Memory(map) => {
        map.write().await.insert(key.to_string(), value);
      }
      Cache::File(root) => {
        if let Err(err) = tokio::fs::create_dir_all(root).await {
          logger.log(&format!("failed to create cache directory {}: {err}", root.display())).await;
          return;
        }
        if let Err(err) = tokio::fs::write(root.join(key), value).await {
          logger.log(&format!("failed to write cache entry '{key}': {err}")).await;
        }
      }
    }
  }

  /// Removes every entry. Used only by tests and operator tooling; the
  /// core lifecycle never calls this.
  pub async fn clear(&self) {
    match self {
      Cache::Memory(map) => map.write().await.clear(),
      Cache::File(root) => {
        tokio::fs::remove_dir_all(root).await.unwrap_or_default();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_cache_round_trips() {
    let cache = Cache::memory();
    let logger = ErrorLogger::without_logger();
    cache.set("k", b"v".to_vec(), &logger).await;
    assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
  }

  #[tokio::test]
  async fn file_cache_round_trips() {
    let dir = std::env::temp_dir().join(format!("autocert-cache-test-{}", std::process::id()));
    let cache = Cache::file(dir.clone());
    let logger = ErrorLogger::without_logger();
    cache.set("k", b"v".to_vec(), &logger).await;
    assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
    cache.clear().await;
    assert_eq!(cache.get("k").await, None);
  }

  #[tokio::test]
  async fn missing_key_is_a_miss_not_an_error() {
    let cache = Cache::memory();
    assert_eq!(cache.get("absent").await, None);
  }
}
