//! The key-value store boundary.
//!
//! Everything the cache needs from a store is in `KeyValueStore`: string
//! get/set, an integer counter, append-only lists, and a full wipe. Each
//! command is atomic on its own; nothing here groups commands into a
//! transaction.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::errors::CacheError;
use crate::logging::append_run_log;
use crate::types::BackendKind;
use serde_json::json;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait KeyValueStore: Send + Sync {
    /// Unconditional write. No expiry.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
    /// `None` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    /// Adds one to the integer stored under `name`, starting from 0, and
    /// returns the new value.
    fn incr(&self, name: &str) -> Result<i64, CacheError>;
    /// Appends `entry` to the tail of `list`.
    fn rpush(&self, list: &str, entry: &[u8]) -> Result<(), CacheError>;
    /// Inclusive range read; negative indexes count back from the tail, so
    /// `(0, -1)` is the whole list.
    fn lrange(&self, list: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>, CacheError>;
    fn flush_all(&self) -> Result<(), CacheError>;
}

/// Opens the backend named by `cfg`.
pub fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn KeyValueStore>, CacheError> {
    append_run_log(
        "info",
        "store.open",
        json!({ "backend": cfg.backend.as_str() }),
    );
    match cfg.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        BackendKind::Sqlite => Ok(Arc::new(SqliteStore::open(&cfg.sqlite_path)?)),
        BackendKind::Redis => open_redis(&cfg.redis_url),
    }
}

#[cfg(feature = "redis-backend")]
fn open_redis(url: &str) -> Result<Arc<dyn KeyValueStore>, CacheError> {
    Ok(Arc::new(redis::RedisStore::open(url)?))
}

#[cfg(not(feature = "redis-backend"))]
fn open_redis(_url: &str) -> Result<Arc<dyn KeyValueStore>, CacheError> {
    Err(CacheError::InvalidConfig(
        "the redis backend requires building with the `redis-backend` feature".to_string(),
    ))
}

/// Resolves Redis-style `LRANGE` bounds against a list of `len` entries into
/// a half-open `start..end` window, or `None` when the window is empty.
pub fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize + 1))
}

/// Reads a stored counter value. Anything but a decimal `i64` is rejected
/// the way Redis rejects `INCR` on a non-integer.
pub(crate) fn parse_counter(raw: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| CacheError::Store("value is not an integer or out of range".to_string()))
}
