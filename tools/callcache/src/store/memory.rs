use crate::errors::CacheError;
use crate::store::{parse_counter, resolve_range, KeyValueStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    strings: HashMap<String, Vec<u8>>,
    lists: HashMap<String, Vec<Vec<u8>>>,
    journal: Vec<String>,
    fail_next: Option<CacheError>,
    unavailable: bool,
}

/// In-process store. Clones share the same data, so a test can keep one
/// handle for inspection while the cache owns another.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next command fails with `error` instead of running.
    pub fn set_fail_next(&self, error: CacheError) {
        self.inspect().fail_next = Some(error);
    }

    /// While set, every command fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inspect().unavailable = unavailable;
    }

    /// Every command that ran, in order, as `"<COMMAND> <key>"`.
    pub fn journal(&self) -> Vec<String> {
        self.inspect().journal.clone()
    }

    fn inspect(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(
        &self,
        command: &str,
        key: &str,
        f: impl FnOnce(&mut MemoryState) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut state = self.state.lock().map_err(|_| {
            CacheError::StoreUnavailable("memory store lock poisoned".to_string())
        })?;
        if state.unavailable {
            return Err(CacheError::StoreUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        let entry = if key.is_empty() {
            command.to_string()
        } else {
            format!("{command} {key}")
        };
        state.journal.push(entry);
        f(&mut state)
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.with_state("SET", key, |state| {
            state.strings.insert(key.to_string(), value.to_vec());
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.with_state("GET", key, |state| Ok(state.strings.get(key).cloned()))
    }

    fn incr(&self, name: &str) -> Result<i64, CacheError> {
        self.with_state("INCR", name, |state| {
            let current = match state.strings.get(name) {
                Some(raw) => parse_counter(raw)?,
                None => 0,
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| CacheError::Store("increment would overflow".to_string()))?;
            state
                .strings
                .insert(name.to_string(), next.to_string().into_bytes());
            Ok(next)
        })
    }

    fn rpush(&self, list: &str, entry: &[u8]) -> Result<(), CacheError> {
        self.with_state("RPUSH", list, |state| {
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .push(entry.to_vec());
            Ok(())
        })
    }

    fn lrange(&self, list: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>, CacheError> {
        self.with_state("LRANGE", list, |state| {
            let Some(entries) = state.lists.get(list) else {
                return Ok(Vec::new());
            };
            Ok(match resolve_range(entries.len(), start, end) {
                Some((from, to)) => entries[from..to].to_vec(),
                None => Vec::new(),
            })
        })
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        self.with_state("FLUSHALL", "", |state| {
            state.strings.clear();
            state.lists.clear();
            Ok(())
        })
    }
}
