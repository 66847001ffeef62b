use std::sync::{Mutex, MutexGuard};

use redis::{Client, Commands, Connection};
use serde_json::json;

use crate::errors::CacheError;
use crate::logging::append_run_log;
use crate::store::KeyValueStore;

/// A Redis server reached over one synchronous connection.
pub struct RedisStore {
    conn: Mutex<Connection>,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| CacheError::InvalidConfig(e.to_string()))?;
        let conn = client.get_connection().map_err(redis_err)?;
        append_run_log(
            "info",
            "redis_store.connected",
            json!({ "addr": client.get_connection_info().addr.to_string() }),
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| {
            CacheError::StoreUnavailable("redis connection lock poisoned".to_string())
        })
    }
}

impl KeyValueStore for RedisStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.conn()?.set::<_, _, ()>(key, value).map_err(redis_err)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.conn()?.get(key).map_err(redis_err)
    }

    fn incr(&self, name: &str) -> Result<i64, CacheError> {
        self.conn()?.incr(name, 1_i64).map_err(redis_err)
    }

    fn rpush(&self, list: &str, entry: &[u8]) -> Result<(), CacheError> {
        self.conn()?.rpush::<_, _, ()>(list, entry).map_err(redis_err)
    }

    fn lrange(&self, list: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>, CacheError> {
        self.conn()?
            .lrange(list, start as isize, end as isize)
            .map_err(redis_err)
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        redis::cmd("FLUSHDB")
            .query::<()>(&mut *conn)
            .map_err(redis_err)?;
        append_run_log("info", "redis_store.flushed", json!({}));
        Ok(())
    }
}

fn redis_err(error: redis::RedisError) -> CacheError {
    if error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
        || error.is_timeout()
    {
        CacheError::StoreUnavailable(error.to_string())
    } else {
        CacheError::Store(error.to_string())
    }
}
